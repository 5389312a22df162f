use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{KeySource, ProviderConfig};

/// Every configured key for the provider is in the caller's exclusion set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("all {key_count} API keys for provider '{provider}' are excluded")]
pub struct KeysExhausted {
    pub provider: String,
    pub key_count: usize,
}

/// Process-wide round-robin key selection, one shared cursor per provider.
///
/// The cursor advances on every successful selection, not just on retries, so
/// concurrent requests spread across the whole key list. Exclusion sets are
/// request-scoped and never touch shared state.
#[derive(Debug, Default)]
pub struct KeyRotator {
    cursors: RwLock<HashMap<String, AtomicUsize>>,
}

impl KeyRotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Round-robin selection skipping `excluded`. Passthrough providers never
    /// reach this; the engine uses the client credential directly.
    pub fn next_key(
        &self,
        config: &ProviderConfig,
        excluded: &HashSet<String>,
    ) -> Result<String, KeysExhausted> {
        let keys = match &config.auth {
            KeySource::Static(keys) => keys,
            KeySource::Passthrough => {
                return Err(KeysExhausted {
                    provider: config.name.clone(),
                    key_count: 0,
                });
            }
        };

        if excluded.len() >= keys.len() {
            return Err(KeysExhausted {
                provider: config.name.clone(),
                key_count: keys.len(),
            });
        }

        let start = self.advance(&config.name);
        for offset in 0..keys.len() {
            let key = &keys[(start + offset) % keys.len()];
            if !excluded.contains(key) {
                return Ok(key.clone());
            }
        }

        Err(KeysExhausted {
            provider: config.name.clone(),
            key_count: keys.len(),
        })
    }

    /// Current cursor position, for introspection and tests.
    pub fn cursor(&self, provider: &str) -> usize {
        self.cursors
            .read()
            .expect("key cursor lock poisoned")
            .get(provider)
            .map(|cursor| cursor.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Atomically fetch-and-advance the provider's cursor.
    fn advance(&self, provider: &str) -> usize {
        {
            let cursors = self.cursors.read().expect("key cursor lock poisoned");
            if let Some(cursor) = cursors.get(provider) {
                return cursor.fetch_add(1, Ordering::Relaxed);
            }
        }
        let mut cursors = self.cursors.write().expect("key cursor lock poisoned");
        cursors
            .entry(provider.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }
}
