//! HTTP surface: inbound auth, route classification, and response assembly
//! for both wire protocols.

pub mod auth;
pub mod routes;
pub mod tokens;

pub use routes::{AppState, router};
