//! Configuration management for herakles-fpm-exporter.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use crate::cli::{Args, ConfigFormat, LogFormat};
use crate::fpm::address::parse_endpoint;
use crate::fpm::discovery::DiscoveredPool;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// Default configuration constants
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_POOL_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_PHP_INFO_TTL_SECS: u64 = 3600;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_DISCOVERY_RETRIES: u32 = 5;
pub const DEFAULT_DISCOVERY_RETRY_DELAY_SECS: u64 = 2;
pub const DEFAULT_PHP_BINARY: &str = "php";

/// One FPM pool to collect from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Data socket; also the key results are stored under.
    pub socket: String,
    /// Socket serving the status page. Falls back to `socket` when empty.
    pub status_socket: String,
    pub status_path: String,
    /// FPM config file, used to dump static pool settings.
    pub config_path: String,
    /// FPM binary.
    pub binary: String,
    pub cli_binary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl PoolConfig {
    pub fn status_socket(&self) -> &str {
        if self.status_socket.is_empty() {
            &self.socket
        } else {
            &self.status_socket
        }
    }

    pub fn poll_interval(&self, default: Duration) -> Duration {
        self.poll_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(default)
    }
}

impl From<DiscoveredPool> for PoolConfig {
    fn from(pool: DiscoveredPool) -> Self {
        Self {
            socket: pool.socket.to_string(),
            status_socket: pool.status_socket.to_string(),
            status_path: pool.status_path,
            config_path: pool.config_path,
            binary: pool.binary,
            cli_binary: pool.cli_binary,
            poll_interval_ms: None,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some("info".into()),
            format: Some(LogFormat::Text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhpFpmConfig {
    pub enabled: Option<bool>,
    pub autodiscover: Option<bool>,
    /// Global poll interval, used by pools without their own.
    pub poll_interval_ms: Option<u64>,
    /// Global per-tick timeout, used by pools without their own.
    pub timeout_ms: Option<u64>,
    /// Autodiscovery attempts before giving up on finding any pool.
    pub retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub pools: Vec<PoolConfig>,
}

impl Default for PhpFpmConfig {
    fn default() -> Self {
        Self {
            enabled: Some(true),
            autodiscover: Some(true),
            poll_interval_ms: Some(DEFAULT_POLL_INTERVAL_MS),
            timeout_ms: Some(DEFAULT_POOL_TIMEOUT_MS),
            retries: Some(DEFAULT_DISCOVERY_RETRIES),
            retry_delay_secs: Some(DEFAULT_DISCOVERY_RETRY_DELAY_SECS),
            pools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhpConfig {
    /// PHP binary for runtime info when a pool has no FPM binary.
    pub binary: Option<String>,
}

impl Default for PhpConfig {
    fn default() -> Self {
        Self {
            binary: Some(DEFAULT_PHP_BINARY.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub php_info_ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            php_info_ttl_secs: Some(DEFAULT_PHP_INFO_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub timeout_secs: Option<u64>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub phpfpm: PhpFpmConfig,
    pub php: PhpConfig,
    pub cache: CacheConfig,
    pub commands: CommandsConfig,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.phpfpm.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.phpfpm.timeout_ms.unwrap_or(DEFAULT_POOL_TIMEOUT_MS))
    }

    pub fn php_info_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.php_info_ttl_secs.unwrap_or(DEFAULT_PHP_INFO_TTL_SECS))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout_secs.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS))
    }

    pub fn discovery_retries(&self) -> u32 {
        self.phpfpm.retries.unwrap_or(DEFAULT_DISCOVERY_RETRIES).max(1)
    }

    pub fn discovery_retry_delay(&self) -> Duration {
        Duration::from_secs(
            self.phpfpm
                .retry_delay_secs
                .unwrap_or(DEFAULT_DISCOVERY_RETRY_DELAY_SECS),
        )
    }

    pub fn php_binary(&self) -> &str {
        self.php.binary.as_deref().unwrap_or(DEFAULT_PHP_BINARY)
    }

    pub fn autodiscover(&self) -> bool {
        self.phpfpm.autodiscover.unwrap_or(true)
    }

    pub fn fpm_enabled(&self) -> bool {
        self.phpfpm.enabled.unwrap_or(true)
    }

    /// Appends discovered pools whose socket is not configured yet. Returns
    /// the number of pools added.
    pub fn merge_discovered(&mut self, discovered: Vec<DiscoveredPool>) -> usize {
        let mut added = 0;
        for pool in discovered {
            let candidate = PoolConfig::from(pool);
            if self.phpfpm.pools.iter().any(|p| p.socket == candidate.socket) {
                continue;
            }
            self.phpfpm.pools.push(candidate);
            added += 1;
        }
        added
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.phpfpm.poll_interval_ms == Some(0) {
        return Err("phpfpm.poll_interval_ms must be greater than 0".into());
    }
    if cfg.phpfpm.timeout_ms == Some(0) {
        return Err("phpfpm.timeout_ms must be greater than 0".into());
    }
    if cfg.commands.timeout_secs == Some(0) {
        return Err("commands.timeout_secs must be greater than 0".into());
    }

    if let Some(level) = cfg.logging.level.as_deref() {
        match level {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => {}
            other => {
                return Err(format!(
                    "Invalid logging.level '{}', expected off/error/warn/info/debug/trace",
                    other
                )
                .into());
            }
        }
    }

    for (idx, pool) in cfg.phpfpm.pools.iter().enumerate() {
        if pool.socket.trim().is_empty() {
            return Err(format!("phpfpm.pools[{}]: socket is not set", idx).into());
        }
        if pool.status_path.trim().is_empty() {
            return Err(format!(
                "phpfpm.pools[{}] ({}): status_path is not set",
                idx, pool.socket
            )
            .into());
        }
        match parse_endpoint(pool.status_socket()) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(format!(
                    "phpfpm.pools[{}]: status socket '{}' must be a path or host:port",
                    idx,
                    pool.status_socket()
                )
                .into());
            }
            Err(e) => return Err(format!("phpfpm.pools[{}]: {}", idx, e).into()),
        }
        if pool.poll_interval_ms == Some(0) || pool.timeout_ms == Some(0) {
            return Err(format!(
                "phpfpm.pools[{}] ({}): poll_interval_ms and timeout_ms must be greater than 0",
                idx, pool.socket
            )
            .into());
        }
    }

    if cfg.fpm_enabled() && cfg.phpfpm.pools.is_empty() && !cfg.autodiscover() {
        return Err("No pools configured and autodiscovery is disabled".into());
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref().and_then(|p| p.to_str()))?
    };

    if let Some(ms) = args.poll_interval_ms {
        config.phpfpm.poll_interval_ms = Some(ms);
    }
    if let Some(ms) = args.timeout_ms {
        config.phpfpm.timeout_ms = Some(ms);
    }
    if args.no_autodiscover {
        config.phpfpm.autodiscover = Some(false);
    }
    if let Some(binary) = &args.php_binary {
        config.php.binary = Some(binary.clone());
    }
    if let Some(format) = args.log_format {
        config.logging.format = Some(format);
    }

    Ok(config)
}

/// Enhanced configuration loading with multiple format support
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        // Try default locations
        let defaults = [
            "/etc/herakles/fpm-exporter.yaml",
            "/etc/herakles/fpm-exporter.yml",
            "/etc/herakles/fpm-exporter.json",
            "./herakles-fpm-exporter.yaml",
            "./herakles-fpm-exporter.yml",
            "./herakles-fpm-exporter.json",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(""))
    };

    if !path.exists() || path.to_string_lossy().is_empty() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            // Default to YAML
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render_config(config, format)?);
    Ok(())
}

pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String, Box<dyn std::error::Error>> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}
