//! Provider configuration, alias resolution, and API key rotation.
//!
//! Everything here is either immutable after startup (`ProviderConfig`,
//! `ProviderRegistry`, alias tables) or explicitly shared mutable state with
//! atomic access (`KeyRotator`). No IO.

pub mod alias;
pub mod config;
pub mod keys;
pub mod registry;

pub use alias::{AliasResolver, ResolvedModel};
pub use config::{ConfigError, KeySource, ProviderConfig, WireFormat};
pub use keys::{KeyRotator, KeysExhausted};
pub use registry::ProviderRegistry;
