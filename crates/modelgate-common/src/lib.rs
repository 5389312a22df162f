//! Shared error taxonomy and request identifiers.

use serde::{Deserialize, Serialize};

/// Trace id attached to every request; also surfaced to clients in a
/// response header for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

impl TraceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything that can terminate a request, with the recovery policy encoded
/// in where each variant is produced: auth/rate-limit faults are retried via
/// key rotation inside the engine and only surface here as `AllKeysExhausted`;
/// transport faults are retried per key and surface as `UpstreamUnavailable`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("model '{model}' could not be resolved: {reason}")]
    UnresolvedModel { model: String, reason: String },

    #[error("all API keys for provider '{provider}' are exhausted")]
    AllKeysExhausted { provider: String },

    #[error("provider '{provider}' is passthrough; supply an API key with the request")]
    PassthroughKeyRequired { provider: String },

    #[error("upstream rejected the provided credential with status {status}")]
    UpstreamAuth { status: u16 },

    #[error("upstream for provider '{provider}' unavailable after {attempts} attempts: {reason}")]
    UpstreamUnavailable {
        provider: String,
        attempts: u32,
        reason: String,
    },

    #[error("upstream returned status {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("conversion failed at '{field}': {reason}")]
    Conversion { field: String, reason: String },

    #[error("client disconnected")]
    ClientDisconnected,
}

impl GatewayError {
    /// HTTP status the error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::UnresolvedModel { .. } => 404,
            GatewayError::AllKeysExhausted { .. } => 429,
            GatewayError::PassthroughKeyRequired { .. } => 401,
            GatewayError::UpstreamAuth { .. } => 401,
            GatewayError::UpstreamUnavailable { .. } => 502,
            GatewayError::UpstreamRejected { status, .. } => *status,
            GatewayError::Conversion { .. } => 502,
            GatewayError::ClientDisconnected => 499,
        }
    }

    /// Stable machine-readable kind for error bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::UnresolvedModel { .. } => "unresolved_model",
            GatewayError::AllKeysExhausted { .. } => "all_keys_exhausted",
            GatewayError::PassthroughKeyRequired { .. } => "passthrough_key_required",
            GatewayError::UpstreamAuth { .. } => "upstream_auth",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::UpstreamRejected { .. } => "upstream_error",
            GatewayError::Conversion { .. } => "conversion_error",
            GatewayError::ClientDisconnected => "client_disconnected",
        }
    }

    /// Remediation hint appended to error bodies where one exists.
    pub fn hint(&self) -> Option<String> {
        match self {
            GatewayError::UnresolvedModel { .. } => Some(
                "use '<provider>:<model>' or an alias configured for the default provider"
                    .to_string(),
            ),
            GatewayError::PassthroughKeyRequired { provider } => Some(format!(
                "send the upstream API key for provider '{provider}' in x-api-key or Authorization"
            )),
            GatewayError::AllKeysExhausted { provider } => Some(format!(
                "every configured key for provider '{provider}' was rejected; check the keys or raise the rate limits"
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        let err = GatewayError::AllKeysExhausted {
            provider: "openai".to_string(),
        };
        assert_eq!(err.status(), 429);
        assert_eq!(err.kind(), "all_keys_exhausted");

        let err = GatewayError::Conversion {
            field: "choices".to_string(),
            reason: "missing".to_string(),
        };
        assert_eq!(err.status(), 502);

        let err = GatewayError::UpstreamRejected {
            status: 400,
            body: "bad".to_string(),
        };
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn trace_ids_are_unique() {
        assert_ne!(TraceId::generate(), TraceId::generate());
    }
}
