//! CLI arguments and subcommands for herakles-fpm-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-fpm-exporter",
    about = "PHP-FPM pool discovery and status collection agent",
    long_about = "PHP-FPM pool discovery and status collection agent.\n\n\
                  Finds running PHP-FPM masters, reads their pool configuration and \
                  polls every pool's status page over FastCGI, enriched with PHP \
                  runtime and opcache details.",
    author = "Michael Moll <exporter@herakles.now> - Herakles",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level (overrides logging.level)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Log output format (overrides logging.format)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Global poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Global per-pool collection timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Do not scan for running FPM masters
    #[arg(long)]
    pub no_autodiscover: bool,

    /// PHP binary used for runtime info when a pool has none
    #[arg(long)]
    pub php_binary: Option<String>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Scan running processes for FPM pools and print them as JSON
    Discover,

    /// Collect every configured pool once and print the report as JSON
    Collect {
        /// Skip autodiscovery and use configured pools only
        #[arg(long)]
        configured_only: bool,
    },

    /// Poll every pool on its own interval until interrupted (default)
    Run,
}
