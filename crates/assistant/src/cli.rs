//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pl_domain::config::Config;
use pl_domain::error::{Error, Result};

#[derive(Parser)]
#[command(name = "parley", about = "Multi-channel conversational assistant core")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "parley.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the assistant (default).
    Serve,
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report problems.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load config from the given path; a missing file yields defaults with a
/// warning (useful for first runs with the console channel).
pub fn load_config(path: &PathBuf) -> Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found; using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}
