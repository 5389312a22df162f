use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use modelgate_protocol::claude::stream::StreamEvent;
use modelgate_protocol::openai::stream::ChatCompletionChunk;
use modelgate_protocol::sse::SseParser;
use modelgate_transform::claude2openai::stream::ClaudeToOpenAiStream;
use modelgate_transform::openai2claude::stream::OpenAiToClaudeStream;

use crate::metrics::{MetricsSink, RequestOutcome, RequestRecord, TokenCounts};

/// Scoped finalization: the metrics sink fires exactly once however the
/// request ends. Dropping an unfinished guard records a disconnect, which
/// covers cancellation and panics in the surrounding task.
pub struct FinalizeGuard {
    inner: Option<GuardInner>,
}

struct GuardInner {
    sink: Arc<dyn MetricsSink>,
    trace_id: String,
    provider: String,
    model: String,
    started: Instant,
}

impl FinalizeGuard {
    pub fn new(
        sink: Arc<dyn MetricsSink>,
        trace_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            inner: Some(GuardInner {
                sink,
                trace_id: trace_id.into(),
                provider: provider.into(),
                model: model.into(),
                started: Instant::now(),
            }),
        }
    }

    pub fn finish(
        mut self,
        outcome: RequestOutcome,
        error_kind: Option<String>,
        tokens: TokenCounts,
    ) {
        self.fire(outcome, error_kind, tokens);
    }

    fn fire(&mut self, outcome: RequestOutcome, error_kind: Option<String>, tokens: TokenCounts) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        inner.sink.record(RequestRecord {
            trace_id: inner.trace_id,
            provider: inner.provider,
            model: inner.model,
            outcome,
            error_kind,
            tokens,
            duration: inner.started.elapsed(),
        });
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        self.fire(
            RequestOutcome::Disconnected,
            None,
            TokenCounts::default(),
        );
    }
}

/// Incremental protocol conversion for one streamed response. Wraps the
/// transform-layer state machines and tracks token usage as events pass
/// through.
pub enum RelayConverter {
    /// Claude-speaking client, OpenAI-speaking upstream.
    OpenAiToClaude(OpenAiToClaudeStream),
    /// OpenAI-speaking client, Claude-speaking upstream.
    ClaudeToOpenAi(ClaudeToOpenAiStream),
    /// Same protocol on both sides; frames are re-encoded, not transformed.
    ClaudePassthrough { message_stopped: bool },
    OpenAiPassthrough,
}

impl RelayConverter {
    /// SSE content type for the client side; identical for both protocols.
    pub const CONTENT_TYPE: &'static str = "text/event-stream";

    /// Convert one upstream SSE data payload into zero-or-more client
    /// frames. Partial tool-call fragments yield nothing; the state keeps
    /// them until the call completes.
    pub fn apply_data(&mut self, data: &str, usage: &mut TokenCounts) -> Vec<Bytes> {
        match self {
            RelayConverter::OpenAiToClaude(state) => {
                if data.trim() == "[DONE]" {
                    return Vec::new();
                }
                let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        debug!(error = %err, "skipping undecodable upstream chunk");
                        return Vec::new();
                    }
                };
                absorb_openai_usage(&chunk, usage);
                state
                    .apply_chunk(chunk)
                    .iter()
                    .filter_map(encode_claude_event)
                    .collect()
            }
            RelayConverter::ClaudeToOpenAi(state) => {
                let event: StreamEvent = match serde_json::from_str(data) {
                    Ok(event) => event,
                    Err(err) => {
                        debug!(error = %err, "skipping undecodable upstream event");
                        return Vec::new();
                    }
                };
                absorb_claude_usage(&event, usage);
                state
                    .apply_event(event)
                    .iter()
                    .filter_map(encode_openai_chunk)
                    .collect()
            }
            RelayConverter::ClaudePassthrough { message_stopped } => {
                let Ok(event) = serde_json::from_str::<StreamEvent>(data) else {
                    return Vec::new();
                };
                absorb_claude_usage(&event, usage);
                if matches!(event, StreamEvent::MessageStop) {
                    *message_stopped = true;
                }
                encode_claude_event(&event).into_iter().collect()
            }
            RelayConverter::OpenAiPassthrough => {
                if data.trim() == "[DONE]" {
                    // The terminal marker is re-emitted by finish().
                    return Vec::new();
                }
                if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(data) {
                    absorb_openai_usage(&chunk, usage);
                }
                Some(sse_data_frame(data)).into_iter().collect()
            }
        }
    }

    /// Emit the protocol-correct terminal frames. Called exactly once when
    /// the upstream ends, however it ends.
    pub fn finish(&mut self) -> Vec<Bytes> {
        match self {
            RelayConverter::OpenAiToClaude(state) => state
                .finish()
                .iter()
                .filter_map(encode_claude_event)
                .collect(),
            RelayConverter::ClaudeToOpenAi(state) => {
                let mut frames: Vec<Bytes> = state
                    .finish()
                    .iter()
                    .filter_map(encode_openai_chunk)
                    .collect();
                frames.push(sse_done_frame());
                frames
            }
            RelayConverter::ClaudePassthrough { message_stopped } => {
                if *message_stopped {
                    Vec::new()
                } else {
                    // Upstream ended abruptly; close the stream for the
                    // client anyway.
                    encode_claude_event(&StreamEvent::MessageStop)
                        .into_iter()
                        .collect()
                }
            }
            RelayConverter::OpenAiPassthrough => vec![sse_done_frame()],
        }
    }
}

/// Relay loop: decode upstream bytes, convert incrementally, forward to the
/// client channel. Ordering follows upstream arrival; the guard fires exactly
/// once on every exit path.
pub async fn run_relay(
    mut upstream: mpsc::Receiver<Bytes>,
    mut converter: RelayConverter,
    client: mpsc::Sender<Result<Bytes, std::io::Error>>,
    guard: FinalizeGuard,
) {
    let mut parser = SseParser::new();
    let mut usage = TokenCounts::default();
    let mut client_gone = false;

    'outer: while let Some(chunk) = upstream.recv().await {
        for event in parser.push_bytes(&chunk) {
            if event.data.is_empty() {
                continue;
            }
            for frame in converter.apply_data(&event.data, &mut usage) {
                if client.send(Ok(frame)).await.is_err() {
                    client_gone = true;
                    break 'outer;
                }
            }
        }
    }
    // Dropping the receiver from here on releases the upstream connection.
    drop(upstream);

    if !client_gone {
        let mut tail = Vec::new();
        for event in parser.finish() {
            if !event.data.is_empty() {
                tail.extend(converter.apply_data(&event.data, &mut usage));
            }
        }
        tail.extend(converter.finish());
        for frame in tail {
            if client.send(Ok(frame)).await.is_err() {
                client_gone = true;
                break;
            }
        }
    }

    if client_gone {
        warn!("client disconnected mid-stream");
        guard.finish(RequestOutcome::Disconnected, None, usage);
    } else {
        guard.finish(RequestOutcome::Completed, None, usage);
    }
}

fn absorb_openai_usage(chunk: &ChatCompletionChunk, usage: &mut TokenCounts) {
    if let Some(reported) = &chunk.usage {
        usage.input = reported.prompt_tokens as u64;
        usage.output = reported.completion_tokens as u64;
        usage.cache_read = reported.prompt_tokens_details.cached_tokens as u64;
    }
}

fn absorb_claude_usage(event: &StreamEvent, usage: &mut TokenCounts) {
    let reported = match event {
        StreamEvent::MessageStart { message } => &message.usage,
        StreamEvent::MessageDelta { usage, .. } => usage,
        _ => return,
    };
    if let Some(input) = reported.input_tokens {
        usage.input = input as u64;
    }
    if let Some(output) = reported.output_tokens {
        usage.output = output as u64;
    }
    if let Some(cache_read) = reported.cache_read_input_tokens {
        usage.cache_read = cache_read as u64;
    }
    if let Some(cache_creation) = reported.cache_creation_input_tokens {
        usage.cache_creation = cache_creation as u64;
    }
}

/// `event: <name>` + `data: <json>` framing used by the Messages protocol.
pub fn encode_claude_event(event: &StreamEvent) -> Option<Bytes> {
    let payload = serde_json::to_vec(event).ok()?;
    let name = event.event_name();
    let mut frame = Vec::with_capacity(payload.len() + name.len() + 16);
    frame.extend_from_slice(b"event: ");
    frame.extend_from_slice(name.as_bytes());
    frame.extend_from_slice(b"\ndata: ");
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(b"\n\n");
    Some(Bytes::from(frame))
}

/// Data-only framing used by the Chat Completions protocol.
pub fn encode_openai_chunk(chunk: &ChatCompletionChunk) -> Option<Bytes> {
    sse_json_frame(chunk)
}

fn sse_json_frame<T: Serialize>(value: &T) -> Option<Bytes> {
    let payload = serde_json::to_vec(value).ok()?;
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(b"\n\n");
    Some(Bytes::from(frame))
}

fn sse_data_frame(data: &str) -> Bytes {
    let mut frame = Vec::with_capacity(data.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(data.as_bytes());
    frame.extend_from_slice(b"\n\n");
    Bytes::from(frame)
}

fn sse_done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MemoryMetrics;

    fn guard(sink: &Arc<MemoryMetrics>) -> FinalizeGuard {
        FinalizeGuard::new(sink.clone() as Arc<dyn MetricsSink>, "t1", "p", "m")
    }

    #[test]
    fn guard_fires_once_when_finished() {
        let sink = Arc::new(MemoryMetrics::new());
        guard(&sink).finish(RequestOutcome::Completed, None, TokenCounts::default());
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].outcome, RequestOutcome::Completed);
    }

    #[test]
    fn dropped_guard_records_a_disconnect() {
        let sink = Arc::new(MemoryMetrics::new());
        drop(guard(&sink));
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, RequestOutcome::Disconnected);
    }

    #[test]
    fn claude_passthrough_closes_an_abrupt_stream() {
        let mut converter = RelayConverter::ClaudePassthrough {
            message_stopped: false,
        };
        let mut usage = TokenCounts::default();
        let frames = converter.apply_data(
            "{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}",
            &mut usage,
        );
        assert_eq!(frames.len(), 1);

        let tail = converter.finish();
        assert_eq!(tail.len(), 1);
        assert!(String::from_utf8_lossy(&tail[0]).contains("message_stop"));
    }

    #[test]
    fn claude_passthrough_does_not_duplicate_message_stop() {
        let mut converter = RelayConverter::ClaudePassthrough {
            message_stopped: false,
        };
        let mut usage = TokenCounts::default();
        converter.apply_data("{\"type\":\"message_stop\"}", &mut usage);
        assert!(converter.finish().is_empty());
    }

    #[test]
    fn openai_passthrough_reemits_done_exactly_once() {
        let mut converter = RelayConverter::OpenAiPassthrough;
        let mut usage = TokenCounts::default();
        assert!(converter.apply_data("[DONE]", &mut usage).is_empty());
        let tail = converter.finish();
        assert_eq!(tail.len(), 1);
        assert_eq!(&tail[0][..], b"data: [DONE]\n\n");
    }

    #[test]
    fn passthrough_tracks_claude_usage() {
        let mut converter = RelayConverter::ClaudePassthrough {
            message_stopped: false,
        };
        let mut usage = TokenCounts::default();
        converter.apply_data(
            "{\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"input_tokens\":9,\"output_tokens\":4,\"cache_read_input_tokens\":2}}",
            &mut usage,
        );
        assert_eq!(usage.input, 9);
        assert_eq!(usage.output, 4);
        assert_eq!(usage.cache_read, 2);
    }
}
