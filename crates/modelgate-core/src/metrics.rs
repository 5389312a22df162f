use std::sync::Mutex;
use std::time::Duration;

/// Per-request token accounting. Every field is always populated; protocols
/// that lack a counter report zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed,
    Failed,
    /// The client went away before the response finished. Not an error to
    /// report anywhere, but a distinct outcome in accounting.
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub trace_id: String,
    pub provider: String,
    pub model: String,
    pub outcome: RequestOutcome,
    pub error_kind: Option<String>,
    pub tokens: TokenCounts,
    pub duration: Duration,
}

/// Finalization sink invoked exactly once per request, whatever the ending.
pub trait MetricsSink: Send + Sync {
    fn record(&self, record: RequestRecord);
}

pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _record: RequestRecord) {}
}

/// In-memory sink; the tests use it to assert the exactly-once guarantee.
#[derive(Default)]
pub struct MemoryMetrics {
    records: Mutex<Vec<RequestRecord>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RequestRecord> {
        self.records.lock().expect("metrics lock poisoned").clone()
    }
}

impl MetricsSink for MemoryMetrics {
    fn record(&self, record: RequestRecord) {
        self.records
            .lock()
            .expect("metrics lock poisoned")
            .push(record);
    }
}
