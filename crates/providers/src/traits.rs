use tl_domain::delta::{BoxStream, Delta, TokenCount};
use tl_domain::error::Result;
use tl_domain::message::ProviderMessage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic streaming completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// The linearized conversation to send.
    pub messages: Vec<ProviderMessage>,
    /// Model name without the provider prefix. `None` lets the provider
    /// use its default.
    pub model: Option<String>,
    /// Sampling temperature (0.0 – 2.0). `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Name of a live provider-side context cache covering a prefix of the
    /// conversation.
    pub cached_content: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every model adapter must implement.
///
/// Adapters translate [`ProviderMessage`]s into their wire format and hand
/// back the raw deltas untouched; interpreting them is the engine's job.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Start a streaming completion.
    ///
    /// An `Err` here means the request was rejected before any delta
    /// arrived; failures mid-stream surface as `Err` items.
    async fn stream_completion(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<Delta>>>;

    /// Count the tokens `messages` would cost against `model`.
    async fn count_tokens(
        &self,
        messages: &[ProviderMessage],
        model: Option<&str>,
    ) -> Result<TokenCount>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
