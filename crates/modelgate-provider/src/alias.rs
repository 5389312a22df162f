use std::sync::Arc;

use tracing::debug;

use crate::config::ProviderConfig;
use crate::registry::ProviderRegistry;

pub const DEFAULT_MAX_CHAIN_LENGTH: usize = 10;

/// A client model token resolved to a concrete upstream target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub provider: String,
    pub model: String,
    /// Number of alias hops followed to get here.
    pub hops: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown provider '{provider}' in model '{model}'")]
    UnknownProvider { provider: String, model: String },
    #[error("alias chain for '{model}' exceeded {limit} hops")]
    ChainTooLong { model: String, limit: usize },
}

/// Resolves `provider:alias` / bare tokens through chained, possibly
/// cross-provider alias tables.
///
/// Termination relies solely on the hop limit; there is no cycle detection,
/// so a two-node cycle burns the whole budget before erroring. That is a
/// deliberate trade against per-request bookkeeping and is pinned by a test.
pub struct AliasResolver {
    registry: Arc<ProviderRegistry>,
    max_chain_length: usize,
}

impl AliasResolver {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self::with_chain_limit(registry, DEFAULT_MAX_CHAIN_LENGTH)
    }

    pub fn with_chain_limit(registry: Arc<ProviderRegistry>, max_chain_length: usize) -> Self {
        Self {
            registry,
            max_chain_length,
        }
    }

    pub fn resolve(&self, raw: &str) -> Result<ResolvedModel, ResolveError> {
        let raw = raw.trim();

        // '!' bypasses alias resolution entirely.
        if let Some(literal) = raw.strip_prefix('!') {
            let (provider, model) = self.split_scope(literal, raw)?;
            return Ok(ResolvedModel {
                provider,
                model,
                hops: 0,
            });
        }

        let (mut provider, mut model) = self.split_scope(raw, raw)?;
        let mut hops = 0usize;

        loop {
            let config = self
                .registry
                .get(&provider)
                .ok_or_else(|| ResolveError::UnknownProvider {
                    provider: provider.clone(),
                    model: raw.to_string(),
                })?;

            let Some(target) = lookup_alias(&config, &model) else {
                debug!(model = raw, provider = %provider, upstream = %model, hops, "model resolved");
                return Ok(ResolvedModel {
                    provider,
                    model,
                    hops,
                });
            };

            hops += 1;
            if hops > self.max_chain_length {
                return Err(ResolveError::ChainTooLong {
                    model: raw.to_string(),
                    limit: self.max_chain_length,
                });
            }

            match target.split_once(':') {
                Some((scope, rest)) if self.registry.contains(&scope.to_lowercase()) => {
                    provider = scope.to_lowercase();
                    model = rest.to_string();
                }
                _ => model = target,
            }
        }
    }

    /// Split an optional `provider:` prefix, falling back to the default
    /// provider. An explicit prefix must name a configured provider.
    fn split_scope(&self, token: &str, raw: &str) -> Result<(String, String), ResolveError> {
        match token.split_once(':') {
            Some((scope, rest)) => {
                let scope = scope.to_lowercase();
                if self.registry.contains(&scope) {
                    Ok((scope, rest.to_string()))
                } else {
                    Err(ResolveError::UnknownProvider {
                        provider: scope,
                        model: raw.to_string(),
                    })
                }
            }
            None => Ok((
                self.registry.default_provider().to_string(),
                token.to_string(),
            )),
        }
    }
}

/// Case-insensitive lookup: exact alias name first, then the longest alias
/// that appears as a substring of the model token (underscore and hyphen
/// variants included). Ties break lexicographically.
fn lookup_alias(config: &ProviderConfig, model: &str) -> Option<String> {
    let model_lower = model.to_lowercase();
    if let Some(target) = config.aliases.get(&model_lower) {
        return Some(target.clone());
    }

    let variations = [
        model_lower.clone(),
        model_lower.replace('_', "-"),
        model_lower.replace('-', "_"),
    ];

    let mut best: Option<(&String, &String)> = None;
    for (alias, target) in &config.aliases {
        if !variations.iter().any(|variation| variation.contains(alias.as_str())) {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, _)) => {
                alias.len() > current.len() || (alias.len() == current.len() && alias < current)
            }
        };
        if better {
            best = Some((alias, target));
        }
    }
    best.map(|(_, target)| target.clone())
}
