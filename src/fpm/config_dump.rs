//! FPM configuration dump parsing.
//!
//! `php-fpm -tt --fpm-config <path>` prints the fully resolved configuration
//! as NOTICE log lines. This module turns that text into global and per-pool
//! setting maps and memoizes the result per (binary, config path).

use crate::error::FpmError;
use crate::process::CommandRunner;
use ahash::AHashMap as HashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

const GLOBAL_SECTION: &str = "global";
const NOTICE_MARKER: &str = "] NOTICE:";

/// Parsed output of an FPM config dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FpmStaticConfig {
    pub global: BTreeMap<String, String>,
    pub pools: BTreeMap<String, BTreeMap<String, String>>,
}

impl FpmStaticConfig {
    /// Pool settings matched case-insensitively by pool name.
    pub fn pool(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.pools
            .iter()
            .find(|(section, _)| section.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    }
}

fn clean_line(raw: &str) -> String {
    let mut line = raw.trim();
    if let Some(idx) = line.find(NOTICE_MARKER) {
        line = line[idx + NOTICE_MARKER.len()..].trim();
    }
    let line = line.replace("\\t", "").replace('\t', "");
    line.trim().trim_matches('"').trim().to_string()
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('"').trim().to_string()
}

/// Parses config dump text.
pub fn parse_config_dump(output: &str) -> FpmStaticConfig {
    let mut config = FpmStaticConfig::default();
    let mut current: Option<String> = None;

    for raw in output.lines() {
        let line = clean_line(raw);
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
            let section = &line[1..line.len() - 1];
            if section == GLOBAL_SECTION {
                current = None;
            } else {
                config.pools.entry(section.to_string()).or_default();
                current = Some(section.to_string());
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = unquote(key);
        let mut value = unquote(value);
        if value == "undefined" {
            value.clear();
        }

        match &current {
            Some(pool) => {
                config.pools.entry(pool.clone()).or_default().insert(key, value);
            }
            None => {
                config.global.insert(key, value);
            }
        }
    }

    config
}

/// Memoizes parsed config dumps per (binary, config path) for the process
/// lifetime. Only [`FpmConfigCache::clear`] drops entries.
pub struct FpmConfigCache {
    runner: Arc<dyn CommandRunner>,
    entries: Mutex<HashMap<(String, String), Arc<FpmStaticConfig>>>,
}

impl FpmConfigCache {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached config for this pair, running the dump on a miss.
    pub async fn get(&self, binary: &str, config_path: &str) -> Result<Arc<FpmStaticConfig>, FpmError> {
        let key = (binary.to_string(), config_path.to_string());
        if let Some(cached) = self.lock().get(&key) {
            return Ok(Arc::clone(cached));
        }

        debug!("Dumping FPM config {} with {}", config_path, binary);
        let output = self
            .runner
            .run(binary, &["-tt", "--fpm-config", config_path])
            .await?;
        let parsed = Arc::new(parse_config_dump(&output.combined()));

        // Concurrent misses for the same key may both parse; the first insert wins.
        let mut entries = self.lock();
        let entry = entries.entry(key).or_insert(parsed);
        Ok(Arc::clone(entry))
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Arc<FpmStaticConfig>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandError, CommandOutput};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedRunner {
        stderr: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner for CannedRunner {
        async fn run(&self, _program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
            assert_eq!(args[0], "-tt");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: self.stderr.clone().into_bytes(),
            })
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl CommandRunner for FailingRunner {
        async fn run(&self, program: &str, _args: &[&str]) -> Result<CommandOutput, CommandError> {
            Err(CommandError::Failed {
                program: program.to_string(),
                status: "exit status: 78".into(),
                output: "ERROR: failed to open configuration file".into(),
            })
        }
    }

    #[test]
    fn test_parse_simple_dump() {
        let dump = "[global]\npid = \"/run/x.pid\"\n[www]\nlisten = \"/run/x.sock\"\nundefined_key = undefined";
        let config = parse_config_dump(dump);

        assert_eq!(config.global["pid"], "/run/x.pid");
        assert_eq!(config.pools["www"]["listen"], "/run/x.sock");
        assert_eq!(config.pools["www"]["undefined_key"], "");
    }

    #[test]
    fn test_parse_notice_prefixed_dump() {
        let dump = r#"[12-Dec-2023 10:30:45] NOTICE: [global]
[12-Dec-2023 10:30:45] NOTICE: 	pid = "/var/run/php-fpm.pid"
[12-Dec-2023 10:30:45] NOTICE: error_log = "/var/log/php-fpm.log"
[12-Dec-2023 10:30:45] NOTICE:
[12-Dec-2023 10:30:45] NOTICE: ; This is a comment
[12-Dec-2023 10:30:45] NOTICE: [www]
[12-Dec-2023 10:30:45] NOTICE: \tuser = "www-data"
[12-Dec-2023 10:30:45] NOTICE: group = "www-data"
[12-Dec-2023 10:30:45] NOTICE: pm.status_path = "/status"
[12-Dec-2023 10:30:45] NOTICE: configuration file /etc/php-fpm.conf test is successful
"#;
        let config = parse_config_dump(dump);

        assert_eq!(config.global.len(), 2);
        assert_eq!(config.global["pid"], "/var/run/php-fpm.pid");
        assert_eq!(config.global["error_log"], "/var/log/php-fpm.log");
        assert_eq!(config.pools["www"]["user"], "www-data");
        assert_eq!(config.pools["www"]["group"], "www-data");
        assert_eq!(config.pools["www"]["pm.status_path"], "/status");
    }

    #[test]
    fn test_parse_multiple_pools_and_reentry() {
        let dump = "[www]\nlisten = /run/www.sock\n[api]\nlisten = 127.0.0.1:9001\n[www]\npm = dynamic\n";
        let config = parse_config_dump(dump);
        assert!(config.global.is_empty());
        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.pools["www"]["listen"], "/run/www.sock");
        assert_eq!(config.pools["www"]["pm"], "dynamic");
        assert_eq!(config.pools["api"]["listen"], "127.0.0.1:9001");
    }

    #[test]
    fn test_values_containing_equals() {
        let config = parse_config_dump("[www]\nenv[QUERY] = \"a=b\"\n");
        assert_eq!(config.pools["www"]["env[QUERY]"], "a=b");
    }

    #[test]
    fn test_empty_output() {
        let config = parse_config_dump("");
        assert!(config.global.is_empty());
        assert!(config.pools.is_empty());
    }

    #[test]
    fn test_pool_lookup_is_case_insensitive() {
        let config = parse_config_dump("[WWW]\npm = static\n");
        assert_eq!(config.pool("www").unwrap()["pm"], "static");
        assert!(config.pool("api").is_none());
    }

    #[tokio::test]
    async fn test_cache_returns_same_instance_until_cleared() {
        let runner = Arc::new(CannedRunner {
            stderr: "[global]\npid = /test/cache.pid\n[test]\nlisten = /test/cache.sock\n".into(),
            calls: AtomicUsize::new(0),
        });
        let cache = FpmConfigCache::new(runner.clone());

        let first = cache.get("/usr/sbin/php-fpm", "/etc/fpm.conf").await.unwrap();
        let second = cache.get("/usr/sbin/php-fpm", "/etc/fpm.conf").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        cache.clear();
        let third = cache.get("/usr/sbin/php-fpm", "/etc/fpm.conf").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_keys_on_binary_and_path() {
        let runner = Arc::new(CannedRunner {
            stderr: "[www]\nlisten = /run/www.sock\n".into(),
            calls: AtomicUsize::new(0),
        });
        let cache = FpmConfigCache::new(runner.clone());

        cache.get("/usr/sbin/php-fpm8.1", "/etc/fpm.conf").await.unwrap();
        cache.get("/usr/sbin/php-fpm8.2", "/etc/fpm.conf").await.unwrap();
        cache.get("/usr/sbin/php-fpm8.2", "/etc/other.conf").await.unwrap();
        assert_eq!(cache.len(), 3);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = FpmConfigCache::new(Arc::new(FailingRunner));
        let err = cache
            .get("/non/existent/php-fpm", "/non/existent/config.conf")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to open configuration file"));
        assert!(cache.is_empty());
    }
}
