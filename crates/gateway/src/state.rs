use std::sync::Arc;

use tl_domain::config::Config;
use tl_engine::StreamEngine;
use tl_providers::ProviderRegistry;
use tl_store::MemoryStore;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: MemoryStore,
    pub llm: Arc<ProviderRegistry>,
    pub engine: Arc<StreamEngine>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
