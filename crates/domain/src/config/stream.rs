use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Knobs for the stream runner and the content assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Characters of concatenated text kept as a message label.
    #[serde(default = "d_250")]
    pub label_max_chars: usize,
    /// Buffered wire events per stream before the producer waits.
    #[serde(default = "d_64")]
    pub channel_capacity: usize,
    /// Text block that closes an expanded (page-by-page) PDF.
    #[serde(default = "d_pdf_end_marker")]
    pub pdf_end_marker: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            label_max_chars: 250,
            channel_capacity: 64,
            pdf_end_marker: d_pdf_end_marker(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_250() -> usize {
    250
}
fn d_64() -> usize {
    64
}
fn d_pdf_end_marker() -> String {
    "</document>".into()
}
