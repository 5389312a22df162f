use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConfigError, ProviderConfig};

/// Read-only map of validated provider configurations plus the default
/// provider for unprefixed model tokens. Built once at startup; `get` never
/// locks.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<ProviderConfig>>,
    default_provider: String,
}

impl ProviderRegistry {
    /// Validates every provider and the default-provider reference. Any
    /// failure aborts startup.
    pub fn build(
        configs: Vec<ProviderConfig>,
        default_provider: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let default_provider = default_provider.into();
        let mut providers = HashMap::with_capacity(configs.len());
        for config in configs {
            config.validate()?;
            let name = config.name.clone();
            if providers.insert(name.clone(), Arc::new(config)).is_some() {
                return Err(ConfigError::DuplicateProvider { provider: name });
            }
        }
        if !providers.contains_key(&default_provider) {
            return Err(ConfigError::UnknownDefaultProvider {
                provider: default_provider,
            });
        }
        Ok(Self {
            providers,
            default_provider,
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderConfig>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<ProviderConfig>)> {
        self.providers.iter()
    }
}
