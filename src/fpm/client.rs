//! Pool status collection over FastCGI.
//!
//! [`PoolClient::collect_pool`] is the strict single-pool path: any failure
//! to resolve, dial, query or parse is returned. [`PoolClient::collect_all`]
//! is the best-effort batch path: failing pools are logged, left out of the
//! results and reported in [`BatchReport::errors`]. Config, PHP info and
//! opcache enrichment never fail a pool on either path.

use crate::config::PoolConfig;
use crate::error::FpmError;
use crate::fastcgi::Connection;
use crate::fpm::address::parse_address;
use crate::fpm::config_dump::FpmConfigCache;
use crate::fpm::opcache::OpcacheProbe;
use crate::fpm::php_info::PhpInfoCache;
use crate::fpm::status::{CollectionResult, PoolSnapshot};
use crate::stats::CollectionStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Upper bound for establishing a FastCGI connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of one batch collection, keyed by pool socket.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub timestamp: DateTime<Utc>,
    pub results: BTreeMap<String, CollectionResult>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

pub struct PoolClient {
    configs: Arc<FpmConfigCache>,
    php_info: Arc<PhpInfoCache>,
    opcache: OpcacheProbe,
    stats: Arc<CollectionStats>,
    php_binary: String,
    server_software: String,
    dial_timeout: Duration,
    default_timeout: Duration,
    enrich_timeout: Duration,
}

impl PoolClient {
    pub fn new(
        configs: Arc<FpmConfigCache>,
        php_info: Arc<PhpInfoCache>,
        opcache: OpcacheProbe,
        php_binary: impl Into<String>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            configs,
            php_info,
            opcache,
            stats: Arc::new(CollectionStats::new()),
            php_binary: php_binary.into(),
            server_software: crate::SERVER_SOFTWARE.to_string(),
            dial_timeout: DIAL_TIMEOUT,
            default_timeout,
            enrich_timeout: default_timeout,
        }
    }

    /// Budget for each enrichment step (config dump, opcache round trip).
    /// Defaults to the pool timeout.
    pub fn with_enrich_timeout(mut self, timeout: Duration) -> Self {
        self.enrich_timeout = timeout;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn stats(&self) -> Arc<CollectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Queries the status page of `pool` and returns the derived snapshot
    /// without any enrichment.
    pub async fn fetch_status(&self, pool: &PoolConfig) -> Result<PoolSnapshot, FpmError> {
        let (endpoint, path) = parse_address(pool.status_socket(), &pool.status_path)?;
        debug!(endpoint = %endpoint, status_path = %path, "Dialing FastCGI");

        let mut conn = Connection::dial(&endpoint, self.dial_timeout).await?;
        let params = [
            ("SCRIPT_FILENAME", path.as_str()),
            ("SCRIPT_NAME", path.as_str()),
            ("SERVER_SOFTWARE", self.server_software.as_str()),
            ("REMOTE_ADDR", "127.0.0.1"),
            ("QUERY_STRING", "json&full"),
        ];
        let response = conn.get(&params).await?.ensure_success()?;

        let mut snapshot: PoolSnapshot = serde_json::from_slice(&response.body)?;
        snapshot.address = endpoint.address;
        snapshot.path = path;
        snapshot.recompute_derived(&pool.status_path);
        Ok(snapshot)
    }

    /// Adds config, PHP info and opcache details. Each step has its own time
    /// budget; a step that fails or runs out of time leaves its field unset.
    async fn enrich(&self, pool: &PoolConfig, snapshot: &mut PoolSnapshot, result: &mut CollectionResult) {
        if !pool.binary.is_empty() && !pool.config_path.is_empty() {
            let dump = self.configs.get(&pool.binary, &pool.config_path);
            match tokio::time::timeout(self.enrich_timeout, dump).await {
                Ok(Ok(conf)) => {
                    snapshot.config = conf.pool(&snapshot.name).cloned();
                    result.global = Some(conf.global.clone());
                }
                Ok(Err(e)) => debug!("Failed to read FPM config for {}: {}", pool.socket, e),
                Err(_) => debug!(
                    "Reading FPM config for {} timed out after {:?}",
                    pool.socket, self.enrich_timeout
                ),
            }
        }

        let binary = if pool.binary.is_empty() {
            self.php_binary.as_str()
        } else {
            pool.binary.as_str()
        };
        match self.php_info.get(binary).await {
            Ok(info) => snapshot.php_info = Some((*info).clone()),
            Err(e) => debug!("Failed to get PHP info for {}: {}", binary, e),
        }

        let opcache = self.opcache.status(pool.status_socket(), self.dial_timeout);
        match tokio::time::timeout(self.enrich_timeout, opcache).await {
            Ok(Ok(status)) => snapshot.opcache_status = Some(status),
            Ok(Err(e)) => debug!("Failed to get opcache status for {}: {}", pool.socket, e),
            Err(_) => debug!(
                "Opcache status for {} timed out after {:?}",
                pool.socket, self.enrich_timeout
            ),
        }
    }

    /// Collects one pool. Returns an error if the status page could not be
    /// read; enrichment failures only leave fields unset.
    #[instrument(skip(self, pool), fields(socket = %pool.socket))]
    pub async fn collect_pool(&self, pool: &PoolConfig) -> Result<CollectionResult, FpmError> {
        let snapshot = self.fetch_status(pool).await?;
        Ok(self.finish(pool, snapshot).await)
    }

    async fn finish(&self, pool: &PoolConfig, mut snapshot: PoolSnapshot) -> CollectionResult {
        let mut result = CollectionResult::new();
        self.enrich(pool, &mut snapshot, &mut result).await;
        result.pools.insert(snapshot.name.clone(), snapshot);
        result
    }

    /// [`collect_pool`](Self::collect_pool) with the status request bounded by
    /// the pool's timeout, recording the outcome in the collection stats.
    /// Enrichment runs after the status page is in and cannot fail the pool.
    pub async fn collect_pool_within(&self, pool: &PoolConfig) -> Result<CollectionResult, FpmError> {
        let timeout = pool.timeout(self.default_timeout);
        let started = Instant::now();

        let outcome = match tokio::time::timeout(timeout, self.fetch_status(pool)).await {
            Ok(Ok(snapshot)) => Ok(self.finish(pool, snapshot).await),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FpmError::Timeout {
                socket: pool.socket.clone(),
                timeout,
            }),
        };

        match &outcome {
            Ok(_) => self.stats.record_success(&pool.socket, started.elapsed()),
            Err(e) => self
                .stats
                .record_failure(&pool.socket, started.elapsed(), &e.to_string()),
        }
        outcome
    }

    /// Collects every pool in turn. Never fails as a whole.
    pub async fn collect_all(&self, pools: &[PoolConfig]) -> BatchReport {
        let mut report = BatchReport {
            timestamp: Utc::now(),
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
        };

        for pool in pools {
            match self.collect_pool_within(pool).await {
                Ok(result) => {
                    report.results.insert(pool.socket.clone(), result);
                }
                Err(e) => {
                    warn!("Skipping pool {}: {}", pool.socket, e);
                    report.errors.insert(pool.socket.clone(), e.to_string());
                }
            }
        }

        report
    }
}
