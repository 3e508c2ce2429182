//! AppState construction shared by `serve` and the admin subcommands.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use tl_domain::config::{Config, ConfigSeverity};
use tl_engine::StreamEngine;
use tl_providers::ProviderRegistry;
use tl_store::{DirFileGroups, MemoryStore};

/// Validate config and open the conversation store.
pub fn open_store(config: &Config) -> anyhow::Result<MemoryStore> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let store = MemoryStore::open(&config.store.state_path, config.store.snapshot_on_commit)
        .with_context(|| format!("opening store at {}", config.store.state_path.display()))?;
    tracing::info!(
        path = %config.store.state_path.display(),
        snapshot_on_commit = config.store.snapshot_on_commit,
        "conversation store ready"
    );
    Ok(store)
}

/// Initialize every subsystem and return a fully-wired [`crate::state::AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<crate::state::AppState> {
    let store = open_store(&config)?;

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if llm.is_empty() {
        tracing::info!("no LLM providers initialized, configure API keys to enable streaming");
    } else {
        tracing::info!(providers = llm.len(), "LLM provider registry ready");
    }

    // ── File groups ──────────────────────────────────────────────────
    let files = Arc::new(DirFileGroups::new(config.store.files_dir.clone()));
    tracing::info!(path = %config.store.files_dir.display(), "file groups ready");

    let engine = Arc::new(StreamEngine::new(
        Arc::new(store.clone()),
        files,
        llm.clone(),
        config.llm.clone(),
        config.stream.clone(),
    ));

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = std::env::var(&config.server.api_token_env)
        .ok()
        .filter(|t| !t.is_empty())
        .map(|t| Sha256::digest(t.as_bytes()).to_vec());
    if api_token_hash.is_none() {
        tracing::warn!(
            env = %config.server.api_token_env,
            "API token not set, all endpoints are unauthenticated (dev mode)"
        );
    }

    Ok(crate::state::AppState {
        config,
        store,
        llm,
        engine,
        api_token_hash,
    })
}
