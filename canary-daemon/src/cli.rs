//! CLI argument definitions for canary-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use canary_core::config::CanaryConfig;

/// Platform canary daemon.
///
/// Serves Prometheus metrics and starts a canary run on every scrape.
#[derive(Parser, Debug)]
#[command(name = "canary-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to canary.toml configuration file.
    #[arg(short, long, default_value = "canary.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the HTTP listen port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Run the canary once in the foreground and exit.
    #[arg(long)]
    pub once: bool,
}

impl DaemonCli {
    /// Applies command-line overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut CanaryConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}
