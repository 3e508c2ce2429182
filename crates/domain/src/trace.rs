use serde::Serialize;

/// Structured trace events emitted across all threadline crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    HistoryResolved {
        selector: String,
        chains: usize,
        entries: usize,
        cache_trimmed: usize,
    },
    StreamStarted {
        stream_id: String,
        message_id: String,
        model: String,
        provider_messages: usize,
    },
    StockFlushed {
        stream_id: String,
        content_parts: usize,
        tool_call_parts: usize,
        new_tool_call_groups: usize,
        duration_ms: u64,
    },
    StreamCompleted {
        stream_id: String,
        message_id: String,
        deltas: usize,
        flushes: usize,
    },
    StreamFailed {
        stream_id: String,
        message_id: String,
        kind: String,
        error: String,
    },
    StoreSnapshot {
        path: String,
        bytes: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tl_event");
    }
}
