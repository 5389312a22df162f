use modelgate_core::{MetricsSink, RequestOutcome, RequestRecord};
use tracing::info;

/// Writes one structured log line per finished request. Stands in for a real
/// metrics backend; the engine only sees the `MetricsSink` trait.
pub(crate) struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn record(&self, record: RequestRecord) {
        let outcome = match record.outcome {
            RequestOutcome::Completed => "completed",
            RequestOutcome::Failed => "failed",
            RequestOutcome::Disconnected => "disconnected",
        };
        info!(
            event = "request_finished",
            trace_id = %record.trace_id,
            provider = %record.provider,
            model = %record.model,
            outcome,
            error_kind = record.error_kind.as_deref().unwrap_or(""),
            input_tokens = record.tokens.input,
            output_tokens = record.tokens.output,
            cache_read_tokens = record.tokens.cache_read,
            cache_creation_tokens = record.tokens.cache_creation,
            elapsed_ms = record.duration.as_millis() as u64,
        );
    }
}
