//! The request orchestration engine.
//!
//! Ties together alias resolution, provider configuration, key rotation, the
//! protocol converters, and the streaming relay. IO goes through the
//! [`client::UpstreamClient`] trait so the whole engine is testable against a
//! scripted fake.

pub mod client;
pub mod engine;
pub mod metrics;
pub mod relay;

pub use client::{
    HttpMethod, TransportError, TransportErrorKind, UpstreamBody, UpstreamClient,
    UpstreamClientConfig, UpstreamRequest, UpstreamResponse, WreqUpstreamClient,
};
pub use engine::{Engine, EngineOutput, InboundRequest, StreamHandle};
pub use metrics::{MemoryMetrics, MetricsSink, NoopMetrics, RequestOutcome, RequestRecord, TokenCounts};
