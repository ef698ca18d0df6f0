//! CLI command implementations for herakles-fpm-exporter.
//!
//! This module provides implementations for all CLI subcommands:
//! - `discover`: one discovery pass, printed as JSON
//! - `collect`: one batch collection, printed as JSON
//! - `run`: per-pool polling until a shutdown signal

pub mod collect;
pub mod discover;
pub mod run;

pub use collect::command_collect;
pub use discover::command_discover;
pub use run::command_run;

use herakles_fpm_exporter::config::Config;
use herakles_fpm_exporter::fpm::{Discovery, FpmConfigCache, OpcacheProbe, PhpInfoCache, PoolClient};
use herakles_fpm_exporter::process::{CommandRunner, ProcScanner, SystemCommandRunner};
use std::sync::Arc;
use tracing::{info, warn};

/// Long-lived collaborators shared by all commands.
pub struct Services {
    runner: Arc<dyn CommandRunner>,
    configs: Arc<FpmConfigCache>,
    pub client: Arc<PoolClient>,
}

impl Services {
    pub fn from_config(config: &Config) -> Self {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemCommandRunner::new(config.command_timeout()));
        let configs = Arc::new(FpmConfigCache::new(Arc::clone(&runner)));
        // php_info runs `-v` and `-m` back to back
        let php_info = Arc::new(
            PhpInfoCache::new(Arc::clone(&runner), config.php_info_ttl())
                .with_query_timeout(config.command_timeout() * 2),
        );
        let client = PoolClient::new(
            Arc::clone(&configs),
            php_info,
            OpcacheProbe::default(),
            config.php_binary(),
            config.pool_timeout(),
        );

        Self {
            runner,
            configs,
            client: Arc::new(client),
        }
    }

    pub fn discovery(&self) -> Discovery {
        Discovery::new(
            Arc::new(ProcScanner::default()),
            Arc::clone(&self.runner),
            Arc::clone(&self.configs),
        )
    }

    /// Runs discovery, retrying while nothing is found, and appends new pools
    /// to `config`. Discovery failures are logged; configured pools are still
    /// used.
    pub async fn discover_into(&self, config: &mut Config) {
        let outcome = self
            .discovery()
            .discover_with_retries(config.discovery_retries(), config.discovery_retry_delay())
            .await;
        match outcome {
            Ok(found) => {
                let total = found.len();
                let added = config.merge_discovered(found);
                info!(
                    "Autodiscovery found {} pools ({} new, {} total)",
                    total,
                    added,
                    config.phpfpm.pools.len()
                );
            }
            Err(e) => warn!("Autodiscovery failed: {}", e),
        }
    }
}
