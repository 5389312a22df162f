use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    OpenAI,
    Anthropic,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::OpenAI => "openai",
            WireFormat::Anthropic => "anthropic",
        }
    }
}

/// Where the upstream credential comes from. The variants make the
/// keys-XOR-passthrough invariant structural; `validate` rejects an empty
/// static list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Static(Vec<String>),
    Passthrough,
}

impl KeySource {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, KeySource::Passthrough)
    }

    pub fn key_count(&self) -> usize {
        match self {
            KeySource::Static(keys) => keys.len(),
            KeySource::Passthrough => 0,
        }
    }
}

/// Immutable per-provider configuration. Built once at startup from the
/// external configuration layer and shared behind `Arc` thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub wire_format: WireFormat,
    pub timeout: Duration,
    pub max_retries: u32,
    pub custom_headers: Vec<(String, String)>,
    pub auth: KeySource,
    /// Alias name (lowercase) -> target model or `provider:target`.
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("provider '{provider}': base_url must be set")]
    MissingBaseUrl { provider: String },
    #[error("provider '{provider}': at least one API key or passthrough is required")]
    NoKeys { provider: String },
    #[error("provider '{provider}': API key at position {index} is empty")]
    EmptyKey { provider: String, index: usize },
    #[error("duplicate provider '{provider}'")]
    DuplicateProvider { provider: String },
    #[error("default provider '{provider}' is not configured")]
    UnknownDefaultProvider { provider: String },
}

impl ProviderConfig {
    /// Startup validation; failures are fatal, never deferred per-request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl {
                provider: self.name.clone(),
            });
        }
        match &self.auth {
            KeySource::Passthrough => {}
            KeySource::Static(keys) => {
                if keys.is_empty() {
                    return Err(ConfigError::NoKeys {
                        provider: self.name.clone(),
                    });
                }
                for (index, key) in keys.iter().enumerate() {
                    if key.trim().is_empty() {
                        return Err(ConfigError::EmptyKey {
                            provider: self.name.clone(),
                            index,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
