//! Bidirectional conversion between the Anthropic Messages and OpenAI Chat
//! Completions wire protocols.
//!
//! Each direction has a module with `request`, `response`, and `stream`
//! submodules. Request/response converters are pure functions; the stream
//! converters are explicit state machines that accumulate partial tool-call
//! JSON across chunks and emit each call as one complete client-visible
//! event.

use std::error::Error;
use std::fmt;

pub mod claude2openai;
pub mod openai2claude;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    MissingField(&'static str),
    Malformed {
        field: &'static str,
        reason: String,
    },
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::MissingField(field) => write!(f, "missing field: {field}"),
            TransformError::Malformed { field, reason } => {
                write!(f, "malformed field {field}: {reason}")
            }
        }
    }
}

impl Error for TransformError {}

impl TransformError {
    /// The offending field, for error bodies that name it.
    pub fn field(&self) -> &'static str {
        match self {
            TransformError::MissingField(field) => field,
            TransformError::Malformed { field, .. } => field,
        }
    }
}
