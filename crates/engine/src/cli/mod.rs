pub mod config;
pub mod demo;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Turnkeep — turn and task orchestration for agent conversations.
#[derive(Debug, Parser)]
#[command(name = "turnkeep", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a scripted in-memory session (default when no subcommand is given).
    Demo {
        /// Deny every gated tool call instead of approving it.
        #[arg(long)]
        deny: bool,
        /// Leave gated tool calls undecided so they time out (after at
        /// most a few seconds).
        #[arg(long, conflicts_with = "deny")]
        ignore_approvals: bool,
        /// Load the store from this directory and save it back afterwards.
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
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

/// Load the configuration from the path in `TK_CONFIG` (or
/// `turnkeep.toml` by default).  A missing file yields the defaults.
/// Returns the parsed [`Config`](tk_domain::config::Config) and the path
/// that was used.
pub fn load_config() -> anyhow::Result<(tk_domain::config::Config, String)> {
    let config_path = std::env::var("TK_CONFIG").unwrap_or_else(|_| "turnkeep.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        tk_domain::config::Config::default()
    };

    Ok((config, config_path))
}
