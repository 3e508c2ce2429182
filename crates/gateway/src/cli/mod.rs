pub mod config;
pub mod grant;

use clap::{Parser, Subcommand};

/// threadline: streams model completions into stored conversation threads.
#[derive(Debug, Parser)]
#[command(name = "threadline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Give a user a role in a project.
    Grant {
        /// Project id.
        #[arg(long)]
        project: String,
        /// User id, as sent in the user header.
        #[arg(long)]
        user: String,
        /// owner, admin, member or viewer.
        #[arg(long, default_value = "member", value_parser = grant::parse_role)]
        role: tl_domain::entity::ProjectRole,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `TL_CONFIG` (or
/// `config.toml` by default). Returns the parsed [`Config`] and the
/// path that was used.
///
/// [`Config`]: tl_domain::config::Config
pub fn load_config() -> anyhow::Result<(tl_domain::config::Config, String)> {
    let config_path = std::env::var("TL_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        tl_domain::config::Config::default()
    };

    Ok((config, config_path))
}
