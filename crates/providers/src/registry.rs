//! Provider registry.
//!
//! Constructs and holds all configured model provider instances. At startup
//! the registry reads the [`LlmConfig`], resolves authentication and
//! instantiates the adapter for each configured provider. Model specs take
//! the form `"provider_id/model"`.

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::ModelProvider;
use std::collections::HashMap;
use std::sync::Arc;
use tl_domain::capability::split_model_spec;
use tl_domain::config::{LlmConfig, ProviderKind};
use tl_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds all instantiated model providers.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    default_model: Option<String>,
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    ///
    /// Providers that fail to initialize (usually a missing key) are logged
    /// and skipped rather than aborting the entire startup.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn ModelProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat | ProviderKind::AzureOpenai => {
                    OpenAiCompatProvider::from_config(pc, config.default_timeout_ms)
                        .map(|p| Arc::new(p) as Arc<dyn ModelProvider>)
                }
            };

            match result {
                Ok(provider) => {
                    tracing::info!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        "registered model provider"
                    );
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize model provider, skipping"
                    );
                }
            }
        }

        if providers.is_empty() && !config.providers.is_empty() {
            let require = std::env::var("TL_REQUIRE_LLM")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false);
            if require {
                return Err(Error::Config(
                    "all configured model providers failed to initialize".into(),
                ));
            }
            tracing::warn!(
                "no model providers initialized; streaming endpoints will fail \
                 until auth is configured"
            );
        }

        Ok(Self {
            providers,
            default_model: config.default_model.clone(),
        })
    }

    /// Register a provider under its own id, replacing any previous one.
    pub fn insert(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers
            .insert(provider.provider_id().to_owned(), provider);
    }

    pub fn with_default_model(mut self, spec: impl Into<String>) -> Self {
        self.default_model = Some(spec.into());
        self
    }

    /// Look up a provider by its config id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Resolve a `"provider_id/model"` spec (or the default model when
    /// `spec` is `None`) to the provider and the bare model name.
    pub fn resolve(&self, spec: Option<&str>) -> Result<(Arc<dyn ModelProvider>, String)> {
        let spec = spec
            .or(self.default_model.as_deref())
            .ok_or_else(|| Error::Invalid("no model given and no default_model configured".into()))?;

        let (provider_id, model) = split_model_spec(spec);
        let provider_id = provider_id.ok_or_else(|| {
            Error::Invalid(format!("model spec {spec:?} lacks a provider prefix"))
        })?;
        let provider = self
            .get(provider_id)
            .ok_or_else(|| Error::Invalid(format!("unknown provider {provider_id:?}")))?;
        Ok((provider, model.to_owned()))
    }

    /// The full `"provider_id/model"` spec a request will run against.
    pub fn effective_spec(&self, spec: Option<&str>) -> Option<String> {
        spec.or(self.default_model.as_deref()).map(String::from)
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// List all registered provider IDs (sorted).
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
