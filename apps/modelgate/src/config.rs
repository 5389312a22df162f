use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use modelgate_provider::{KeySource, ProviderConfig, ProviderRegistry, WireFormat};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct GatewayToml {
    #[serde(default = "default_host")]
    pub(crate) host: String,
    #[serde(default = "default_port")]
    pub(crate) port: u16,
    /// Optional shared secret clients must present.
    #[serde(default)]
    pub(crate) api_key: Option<String>,
    pub(crate) default_provider: String,
    pub(crate) providers: BTreeMap<String, ProviderToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProviderToml {
    #[serde(default)]
    base_url: Option<String>,
    wire_format: WireFormat,
    #[serde(default)]
    api_keys: Vec<String>,
    #[serde(default)]
    passthrough: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8790
}

/// Standard base URLs for the two wire formats. Anything self-hosted must
/// set `base_url` explicitly.
fn default_base_url(wire_format: WireFormat) -> &'static str {
    match wire_format {
        WireFormat::OpenAI => "https://api.openai.com/v1",
        WireFormat::Anthropic => "https://api.anthropic.com",
    }
}

pub(crate) fn load(path: &str) -> anyhow::Result<GatewayToml> {
    let path = Path::new(path);
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: GatewayToml =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

/// Turn the parsed file into a validated registry. All failures here are
/// fatal at startup.
pub(crate) fn build_registry(config: &GatewayToml) -> anyhow::Result<ProviderRegistry> {
    let mut providers = Vec::with_capacity(config.providers.len());
    for (name, provider) in &config.providers {
        if provider.passthrough && !provider.api_keys.is_empty() {
            bail!("provider '{name}': api_keys and passthrough are mutually exclusive");
        }
        let auth = if provider.passthrough {
            KeySource::Passthrough
        } else {
            KeySource::Static(provider.api_keys.clone())
        };
        let aliases = provider
            .aliases
            .iter()
            .map(|(alias, target)| (alias.to_lowercase(), target.clone()))
            .collect();
        providers.push(ProviderConfig {
            name: name.to_lowercase(),
            base_url: provider
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url(provider.wire_format).to_string()),
            wire_format: provider.wire_format,
            timeout: Duration::from_secs(provider.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            max_retries: provider.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            custom_headers: provider
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            auth,
            aliases,
        });
    }

    ProviderRegistry::build(providers, config.default_provider.to_lowercase())
        .context("validating provider configuration")
}
