use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logging and trace export
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `[observability]`: how `serve` logs, and where its spans go.
///
/// `RUST_LOG` overrides `log_filter` when set. Without an `[observability.otlp]`
/// table nothing is exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives. The `stream` spans carry `stream_id`,
    /// `message_id` and `thread_id`, so `tl_engine=debug` shows every flush.
    #[serde(default = "d_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub otlp: Option<OtlpConfig>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: d_log_filter(),
            log_format: LogFormat::default(),
            otlp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line, `tl_event` trace events included.
    #[default]
    Json,
    /// Human-readable single lines.
    Compact,
}

/// OTLP/gRPC span export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    /// Collector endpoint, e.g. `http://localhost:4317`.
    pub endpoint: String,
    #[serde(default = "d_service_name")]
    pub service_name: String,
    /// Fraction of traces kept, decided per trace id.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl OtlpConfig {
    /// Problems with this table as `(field, message)` pairs.
    pub fn problems(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            out.push(("observability.otlp.endpoint", format!("'{}' is not an http(s) URL", self.endpoint)));
        }
        if self.service_name.trim().is_empty() {
            out.push(("observability.otlp.service_name", "must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.sample_rate) {
            out.push(("observability.otlp.sample_rate", format!("{} is outside 0.0..=1.0", self.sample_rate)));
        }
        out
    }
}

fn d_log_filter() -> String {
    "info,tl_gateway=debug,tl_engine=debug".into()
}

fn d_service_name() -> String {
    "threadline".into()
}

fn d_sample_rate() -> f64 {
    1.0
}
