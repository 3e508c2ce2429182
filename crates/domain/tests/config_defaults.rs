use tl_domain::config::{Config, ConfigSeverity};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3210);
}

#[test]
fn default_label_length_is_250() {
    let config = Config::default();
    assert_eq!(config.stream.label_max_chars, 250);
}

#[test]
fn empty_file_parses_to_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.server.api_token_env, "TL_API_TOKEN");
    assert_eq!(config.server.user_header, "x-user-id");
    assert!(config.llm.providers.is_empty());
    assert!(config.validate().is_empty());
}

#[test]
fn full_config_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080

[llm]
default_model = "openai/gpt-4o"

[[llm.providers]]
id = "openai"
kind = "openai_compat"
base_url = "https://api.openai.com/v1"
auth = { env = "OPENAI_API_KEY" }

[[llm.models]]
id = "openai/gpt-4o"
native_pdf = false

[stream]
label_max_chars = 100

[store]
state_path = "/var/lib/threadline"
snapshot_on_commit = true
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.llm.providers.len(), 1);
    assert_eq!(config.llm.providers[0].auth.env.as_deref(), Some("OPENAI_API_KEY"));
    assert_eq!(config.stream.label_max_chars, 100);
    assert!(config.store.snapshot_on_commit);
    assert!(!config.has_errors());
}

#[test]
fn duplicate_provider_ids_are_errors() {
    let toml_str = r#"
[[llm.providers]]
id = "openai"
kind = "openai_compat"
base_url = "https://api.openai.com/v1"

[[llm.providers]]
id = "openai"
kind = "azure_openai"
base_url = "https://example.openai.azure.com"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.severity == ConfigSeverity::Error && e.message.contains("duplicate")));
}

#[test]
fn default_model_without_provider_prefix_is_error() {
    let toml_str = r#"
[llm]
default_model = "gpt-4o"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config.has_errors());
}

#[test]
fn unknown_default_provider_is_warning() {
    let toml_str = r#"
[llm]
default_model = "vertex/gemini-1.5-pro"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Warning);
}

#[test]
fn otlp_endpoint_must_be_a_url() {
    let toml_str = r#"
[observability.otlp]
endpoint = "collector:4317"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Error);
    assert_eq!(issues[0].field, "observability.otlp.endpoint");
}
