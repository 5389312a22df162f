//! Wire types for the two supported LLM protocols.
//!
//! This crate is serialization only: serde structs and enums mirroring the
//! Anthropic Messages API and the OpenAI Chat Completions API, plus an
//! incremental SSE parser. No IO and no conversion logic lives here.

pub mod claude;
pub mod openai;
pub mod sse;
