use http::HeaderMap;

/// Credential extracted from the inbound request; forwarded upstream for
/// passthrough providers.
#[derive(Debug, Clone)]
pub struct ClientAuth {
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingKey,
    InvalidKey,
}

impl AuthError {
    pub fn message(&self) -> &'static str {
        match self {
            AuthError::MissingKey => "missing API key: send x-api-key or Authorization: Bearer",
            AuthError::InvalidKey => "invalid API key",
        }
    }
}

/// Shared-secret check. When a gateway key is configured, the client must
/// present exactly that key; otherwise any (or no) credential is accepted and
/// carried along for passthrough providers.
pub fn authenticate(
    headers: &HeaderMap,
    gateway_key: Option<&str>,
) -> Result<ClientAuth, AuthError> {
    let credential = extract_credential(headers);

    if let Some(expected) = gateway_key {
        match credential.as_deref() {
            None => return Err(AuthError::MissingKey),
            Some(got) if got != expected => return Err(AuthError::InvalidKey),
            Some(_) => {}
        }
    }

    Ok(ClientAuth { credential })
}

/// `x-api-key` wins over `Authorization: Bearer` when both are present.
fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key")
        && let Ok(value) = value.to_str()
        && !value.is_empty()
    {
        return Some(value.to_string());
    }
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
