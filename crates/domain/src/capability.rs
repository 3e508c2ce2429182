use serde::{Deserialize, Serialize};

/// Model capabilities every configured model advertises.
/// The content assembler uses them to decide how files are rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Model id in `"provider_id/model"` form.
    pub id: String,
    /// Accepts PDFs as a single inline document.
    #[serde(default)]
    pub native_pdf: bool,
    /// Accepts inline images.
    #[serde(default = "d_true")]
    pub vision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
}

impl ModelCapabilities {
    /// Capabilities assumed for a model missing from the config.
    pub fn fallback(id: impl Into<String>) -> Self {
        Self { id: id.into(), native_pdf: false, vision: true, context_window_tokens: None }
    }
}

fn d_true() -> bool {
    true
}

/// Split a `"provider_id/model"` spec into its two halves.
///
/// A spec without a slash is treated as a bare model name with no provider.
pub fn split_model_spec(spec: &str) -> (Option<&str>, &str) {
    match spec.split_once('/') {
        Some((provider, model)) => (Some(provider), model),
        None => (None, spec),
    }
}
