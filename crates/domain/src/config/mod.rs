mod llm;
mod observability;
mod server;
mod store;
mod stream;

pub use llm::*;
pub use observability::*;
pub use server::*;
pub use store::*;
pub use stream::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the config and return every issue found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();
        let mut push = |severity, field: &str, message: String| {
            issues.push(ConfigError { severity, field: field.to_owned(), message });
        };

        if self.server.port == 0 {
            push(ConfigSeverity::Error, "server.port", "port must be non-zero".into());
        }

        let mut seen = std::collections::HashSet::new();
        for (i, p) in self.llm.providers.iter().enumerate() {
            if p.id.trim().is_empty() {
                push(ConfigSeverity::Error, &format!("llm.providers[{i}].id"), "id is empty".into());
            } else if !seen.insert(p.id.as_str()) {
                push(
                    ConfigSeverity::Error,
                    &format!("llm.providers[{i}].id"),
                    format!("duplicate provider id '{}'", p.id),
                );
            }
            if !p.base_url.starts_with("http://") && !p.base_url.starts_with("https://") {
                push(
                    ConfigSeverity::Error,
                    &format!("llm.providers[{i}].base_url"),
                    format!("'{}' is not an http(s) URL", p.base_url),
                );
            }
        }

        if let Some(default_model) = &self.llm.default_model {
            match default_model.split_once('/') {
                Some((provider, _)) if !seen.contains(provider) => push(
                    ConfigSeverity::Warning,
                    "llm.default_model",
                    format!("provider '{provider}' is not configured"),
                ),
                None => push(
                    ConfigSeverity::Error,
                    "llm.default_model",
                    format!("'{default_model}' must be 'provider_id/model'"),
                ),
                _ => {}
            }
        }

        if self.stream.label_max_chars == 0 {
            push(ConfigSeverity::Warning, "stream.label_max_chars", "labels will be empty".into());
        }
        if self.stream.channel_capacity == 0 {
            push(ConfigSeverity::Error, "stream.channel_capacity", "must be at least 1".into());
        }
        if self.observability.log_filter.trim().is_empty() {
            push(
                ConfigSeverity::Warning,
                "observability.log_filter",
                "empty filter logs nothing unless RUST_LOG is set".into(),
            );
        }
        if let Some(otlp) = &self.observability.otlp {
            for (field, message) in otlp.problems() {
                push(ConfigSeverity::Error, field, message);
            }
        }

        issues
    }

    /// Whether any validation issue is an error.
    pub fn has_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error)
    }
}
