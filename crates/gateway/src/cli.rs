use std::path::PathBuf;

use clap::{Parser, Subcommand};

use rg_domain::config::Config;

/// RunGate — HTTP controller for durable agent runs.
#[derive(Debug, Parser)]
#[command(name = "rungate", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

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

pub fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    Config::load(path).map_err(|e| anyhow::anyhow!("{e}"))
}

pub mod config_cmd {
    use rg_domain::config::{Config, ConfigSeverity};

    /// Report validation issues; returns whether the config is usable.
    pub fn validate(config: &Config) -> bool {
        let issues = config.validate();
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Warning => eprintln!("warning: {issue}"),
                ConfigSeverity::Error => eprintln!("error: {issue}"),
            }
        }
        let errors = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .count();
        if errors == 0 {
            eprintln!("config ok ({} warning(s))", issues.len());
            true
        } else {
            false
        }
    }

    pub fn show(config: &Config) {
        match toml::to_string_pretty(config) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("error: serializing config: {e}"),
        }
    }
}
