//! Command-line surface for the worker binary.

use clap::{Parser, Subcommand};

use sh_domain::config::{Config, ConfigSeverity};
use sh_domain::Result;

#[derive(Parser)]
#[command(name = "stagehand", about = "Real-time event-intelligence worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the worker (default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version and exit.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the effective configuration.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load configuration: `SH_CONFIG` path, else `./stagehand.toml` when
/// present, else defaults — `SH_*` env overrides apply in every case.
pub fn load_config() -> Result<(Config, String)> {
    let path = std::env::var("SH_CONFIG").unwrap_or_else(|_| "stagehand.toml".to_owned());
    match std::fs::read_to_string(&path) {
        Ok(raw) => Ok((Config::from_toml(&raw)?, path)),
        Err(_) => Ok((Config::from_env(), format!("{path} (not found, defaults)"))),
    }
}

/// `config validate`: print issues; `false` when any is an error.
pub fn validate(config: &Config, source: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("config ok ({source})");
        return true;
    }
    let mut valid = true;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => println!("warning: {issue}"),
            ConfigSeverity::Error => {
                println!("error: {issue}");
                valid = false;
            }
        }
    }
    valid
}

/// `config show`: dump the effective configuration.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => println!("failed to render config: {e}"),
    }
}
