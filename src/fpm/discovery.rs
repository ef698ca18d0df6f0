//! FPM master process discovery.
//!
//! Walks the process table for FPM masters, dumps each master's config and
//! emits one [`DiscoveredPool`] per pool that exposes a status page. Anything
//! that does not qualify is skipped with a debug log; only an unreadable
//! process table is an error.

use crate::error::{DiscoveryError, FpmError};
use crate::fpm::address::{resolve_listen, Endpoint};
use crate::fpm::config_dump::FpmConfigCache;
use crate::process::{CommandRunner, ProcessInfo, ProcessSource};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

static FPM_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^php[0-9]{0,2}.*fpm.*$").expect("static regex"));

static PHP_VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PHP (\d+\.\d+)").expect("static regex"));

/// One FPM pool found on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredPool {
    pub pool: String,
    pub config_path: String,
    pub status_path: String,
    pub binary: String,
    pub socket: Endpoint,
    pub status_socket: Endpoint,
    /// Empty when no matching CLI binary was found.
    pub cli_binary: String,
}

/// Whether a process name (or path) looks like an FPM binary.
pub fn matches_fpm_name(name: &str) -> bool {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    FPM_NAME_PATTERN.is_match(&base)
}

/// Config path between the first `(` and the first `)` of a master's
/// command line, or an empty string.
pub fn extract_config_from_master(cmdline: &str) -> String {
    match (cmdline.find('('), cmdline.find(')')) {
        (Some(start), Some(end)) if end > start => cmdline[start + 1..end].to_string(),
        _ => String::new(),
    }
}

/// Finds a CLI binary whose `-v` output reports the same `major.minor` as
/// `fpm_binary` and mentions `cli`.
pub async fn find_matching_cli_binary(
    runner: &dyn CommandRunner,
    fpm_binary: &str,
) -> Result<String, FpmError> {
    let output = runner.run(fpm_binary, &["-v"]).await?.stdout_lossy();
    let version = PHP_VERSION_PATTERN
        .captures(&output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| FpmError::VersionNotFound(output.trim().to_string()))?;

    let candidates = [
        format!("/usr/bin/php{version}"),
        format!("/usr/local/bin/php{version}"),
        format!("php{version}"),
        "php".to_string(),
    ];

    for candidate in candidates {
        let Ok(out) = runner.run(&candidate, &["-v"]).await else {
            continue;
        };
        let text = out.stdout_lossy();
        if text.contains(&version) && text.contains("cli") {
            return Ok(candidate);
        }
    }

    Err(FpmError::CliBinaryNotFound(version))
}

pub struct Discovery {
    processes: Arc<dyn ProcessSource>,
    runner: Arc<dyn CommandRunner>,
    configs: Arc<FpmConfigCache>,
}

impl Discovery {
    pub fn new(
        processes: Arc<dyn ProcessSource>,
        runner: Arc<dyn CommandRunner>,
        configs: Arc<FpmConfigCache>,
    ) -> Self {
        Self {
            processes,
            runner,
            configs,
        }
    }

    /// Scans the process table for FPM masters and returns their pools.
    #[instrument(skip(self))]
    pub async fn discover(&self) -> Result<Vec<DiscoveredPool>, DiscoveryError> {
        let processes = self
            .processes
            .processes()
            .await
            .map_err(DiscoveryError::ListProcesses)?;

        let mut found = Vec::new();
        for proc in &processes {
            found.extend(self.inspect(proc).await);
        }
        debug!("Discovered {} FPM pools", found.len());
        Ok(found)
    }

    /// Repeats [`discover`](Self::discover) until it finds at least one pool,
    /// at most `attempts` times with `delay` between attempts. Returns the
    /// outcome of the last attempt.
    pub async fn discover_with_retries(
        &self,
        attempts: u32,
        delay: Duration,
    ) -> Result<Vec<DiscoveredPool>, DiscoveryError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self.discover().await;
            let found = matches!(&outcome, Ok(pools) if !pools.is_empty());
            if found || attempt >= attempts {
                return outcome;
            }
            match &outcome {
                Ok(_) => info!(attempt, attempts, "No FPM pools found, retrying in {:?}", delay),
                Err(e) => info!(attempt, attempts, "Autodiscovery failed ({}), retrying in {:?}", e, delay),
            }
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }

    async fn inspect(&self, proc: &ProcessInfo) -> Vec<DiscoveredPool> {
        let Some(name) = proc.name.as_deref() else {
            return Vec::new();
        };
        if !matches_fpm_name(name) {
            return Vec::new();
        }

        let cmdline = proc.cmdline.as_deref().unwrap_or_default();
        if !cmdline.contains("master process") {
            return Vec::new();
        }

        let config_path = extract_config_from_master(cmdline);
        if config_path.is_empty() {
            debug!(pid = proc.pid, "No config path in master command line: {}", cmdline);
            return Vec::new();
        }

        let Some(exe) = proc.exe.as_ref() else {
            debug!(pid = proc.pid, "Cannot determine FPM binary path");
            return Vec::new();
        };
        let binary = exe.to_string_lossy().into_owned();

        let parsed = match self.configs.get(&binary, &config_path).await {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Failed to parse FPM config {}: {}", config_path, e);
                return Vec::new();
            }
        };

        let mut pools = Vec::new();
        let mut cli_binary: Option<String> = None;

        for (pool_name, settings) in &parsed.pools {
            let listen = settings.get("listen").map(String::as_str).unwrap_or_default();
            let socket = match resolve_listen(listen).await {
                Ok(Some(endpoint)) => endpoint,
                Ok(None) => continue,
                Err(e) => {
                    debug!(pool = %pool_name, "Skipping pool: {}", e);
                    continue;
                }
            };

            let status_listen = settings
                .get("status_listen")
                .map(String::as_str)
                .unwrap_or_default();
            let status_socket = match resolve_listen(status_listen).await {
                Ok(Some(endpoint)) => endpoint,
                _ => socket.clone(),
            };

            let status_path = settings
                .get("pm.status_path")
                .filter(|p| !p.is_empty())
                .or_else(|| parsed.global.get("pm.status_path").filter(|p| !p.is_empty()));
            let Some(status_path) = status_path.cloned() else {
                debug!(pool = %pool_name, config = %config_path, "Skipping pool with no status path");
                continue;
            };

            // All pools of one master share the binary, so probe once.
            if cli_binary.is_none() {
                cli_binary = Some(
                    match find_matching_cli_binary(self.runner.as_ref(), &binary).await {
                        Ok(cli) => cli,
                        Err(e) => {
                            debug!("No matching CLI binary for {}: {}", binary, e);
                            String::new()
                        }
                    },
                );
            }

            debug!(
                pool = %pool_name,
                config = %config_path,
                socket = %socket,
                status_socket = %status_socket,
                status_path = %status_path,
                "Discovered php-fpm pool"
            );

            pools.push(DiscoveredPool {
                pool: pool_name.clone(),
                config_path: config_path.clone(),
                status_path,
                binary: binary.clone(),
                socket,
                status_socket,
                cli_binary: cli_binary.clone().unwrap_or_default(),
            });
        }

        pools
    }
}
