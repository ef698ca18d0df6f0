//! PHP runtime identity (version line and loaded extensions), cached per
//! binary with a TTL. Failures are cached too and replayed until the entry
//! expires.

use crate::cache::CacheEntry;
use crate::error::FpmError;
use crate::process::{CommandError, CommandRunner};
use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_PHP_INFO_TTL: Duration = Duration::from_secs(3600);

/// Bound for the `-v` and `-m` invocations of one refresh together.
pub const DEFAULT_PHP_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhpRuntimeInfo {
    pub version: String,
    pub extensions: Vec<String>,
}

/// First non-empty line of `php -v`.
pub fn parse_version(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Module names from `php -m`, all sections concatenated in order.
pub fn parse_modules(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('['))
        .map(str::to_string)
        .collect()
}

pub struct PhpInfoCache {
    runner: Arc<dyn CommandRunner>,
    ttl: Duration,
    query_timeout: Duration,
    entries: Mutex<HashMap<String, CacheEntry<PhpRuntimeInfo>>>,
}

impl PhpInfoCache {
    pub fn new(runner: Arc<dyn CommandRunner>, ttl: Duration) -> Self {
        Self {
            runner,
            ttl,
            query_timeout: DEFAULT_PHP_QUERY_TIMEOUT,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A refresh that runs longer than `timeout` is recorded as a failure.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns runtime info for `binary`, refreshing it when the cached
    /// entry is older than the TTL. A cached failure is returned as
    /// [`FpmError::PreviousFailure`] without running anything.
    pub async fn get(&self, binary: &str) -> Result<Arc<PhpRuntimeInfo>, FpmError> {
        let cached = self
            .lock()
            .get(binary)
            .and_then(|entry| entry.fresh(self.ttl, Instant::now()));
        if let Some(hit) = cached {
            return hit.map_err(FpmError::PreviousFailure);
        }

        let result = match tokio::time::timeout(self.query_timeout, self.query(binary)).await {
            Ok(result) => result.map(Arc::new),
            Err(_) => Err(FpmError::Command(CommandError::Timeout {
                program: binary.to_string(),
                timeout: self.query_timeout,
            })),
        };
        let entry = match &result {
            Ok(info) => CacheEntry::ready(Arc::clone(info)),
            Err(e) => {
                debug!("PHP info for {} failed: {}", binary, e);
                CacheEntry::failed(e.to_string())
            }
        };
        self.lock().insert(binary.to_string(), entry);
        result
    }

    async fn query(&self, binary: &str) -> Result<PhpRuntimeInfo, FpmError> {
        let version = self.runner.run(binary, &["-v"]).await?;
        let modules = self.runner.run(binary, &["-m"]).await?;
        Ok(PhpRuntimeInfo {
            version: parse_version(&version.stdout_lossy()),
            extensions: parse_modules(&modules.stdout_lossy()),
        })
    }

    /// Ages the entry for `binary` so that expiry can be exercised without
    /// waiting out the TTL.
    pub fn backdate(&self, binary: &str, by: Duration) {
        if let Some(entry) = self.lock().get_mut(binary) {
            entry.backdate(by);
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<PhpRuntimeInfo>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
