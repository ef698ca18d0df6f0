//! Opcache statistics via a helper script executed inside the pool.

use crate::error::FpmError;
use crate::fastcgi::Connection;
use crate::fpm::address::parse_address;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Request URIs starting with this prefix belong to our own probe.
pub const OPCACHE_URI_PREFIX: &str = "/opcache-status-";

pub const DEFAULT_OPCACHE_SCRIPT: &str = "/tmp/opcache-status-herakles.php";

const SCRIPT_BODY: &str = r#"<?php
error_reporting(0);
ini_set('display_errors', 0);
header("Status: 200 OK");
header("Content-Type: application/json");
echo json_encode(opcache_get_status());
exit;
"#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcacheMemory {
    pub used_memory: u64,
    pub free_memory: u64,
    pub wasted_memory: u64,
    pub current_wasted_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcacheStatistics {
    pub num_cached_scripts: u64,
    pub hits: u64,
    pub misses: u64,
    pub blacklist_misses: u64,
    pub oom_restarts: u64,
    pub hash_restarts: u64,
    pub manual_restarts: u64,
    pub opcache_hit_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcacheStatus {
    #[serde(rename = "opcache_enabled")]
    pub enabled: bool,
    #[serde(rename = "memory_usage")]
    pub memory: OpcacheMemory,
    #[serde(rename = "opcache_statistics")]
    pub statistics: OpcacheStatistics,
}

/// Runs the helper script on a pool's status socket. Nothing is cached; every
/// call performs a fresh round trip.
#[derive(Debug, Clone)]
pub struct OpcacheProbe {
    script_path: PathBuf,
    server_software: String,
}

impl OpcacheProbe {
    pub fn new(script_path: impl Into<PathBuf>, server_software: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
            server_software: server_software.into(),
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Writes the helper script if nothing exists at the path yet. An existing
    /// file is left untouched whatever it contains.
    pub async fn ensure_script(&self) -> Result<(), FpmError> {
        if tokio::fs::try_exists(&self.script_path).await.unwrap_or(false) {
            return Ok(());
        }
        let created = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&self.script_path)
            .await;
        let mut file = match created {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(()),
            Err(source) => return Err(self.script_error(source)),
        };
        file.write_all(SCRIPT_BODY.as_bytes())
            .await
            .map_err(|source| self.script_error(source))?;
        file.flush()
            .await
            .map_err(|source| self.script_error(source))?;
        debug!("Wrote opcache helper script to {}", self.script_path.display());
        Ok(())
    }

    fn script_error(&self, source: std::io::Error) -> FpmError {
        FpmError::HelperScript {
            path: self.script_path.display().to_string(),
            source,
        }
    }

    fn script_name(&self) -> String {
        let base = self
            .script_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("/{base}")
    }

    /// Executes the helper through `status_socket` and decodes the result.
    pub async fn status(&self, status_socket: &str, timeout: Duration) -> Result<OpcacheStatus, FpmError> {
        self.ensure_script().await?;
        let (endpoint, _) = parse_address(status_socket, "")?;

        let filename = self.script_path.to_string_lossy().into_owned();
        let script_name = self.script_name();
        let params = [
            ("SCRIPT_FILENAME", filename.as_str()),
            ("SCRIPT_NAME", script_name.as_str()),
            ("SERVER_SOFTWARE", self.server_software.as_str()),
            ("REMOTE_ADDR", "127.0.0.1"),
        ];

        let mut conn = Connection::dial(&endpoint, timeout).await?;
        let response = conn.get(&params).await?.ensure_success()?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

impl Default for OpcacheProbe {
    fn default() -> Self {
        Self::new(DEFAULT_OPCACHE_SCRIPT, crate::SERVER_SOFTWARE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastcgi::{read_request, write_response};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;
    use tokio::net::UnixListener;

    const STATUS_JSON: &str = r#"{"opcache_enabled":true,"cache_full":false,
        "memory_usage":{"used_memory":9437184,"free_memory":125000000,"wasted_memory":1024,"current_wasted_percentage":0.0008},
        "opcache_statistics":{"num_cached_scripts":42,"hits":1000,"misses":42,"blacklist_misses":0,
        "oom_restarts":0,"hash_restarts":0,"manual_restarts":1,"opcache_hit_rate":95.96}}"#;

    #[tokio::test]
    async fn test_ensure_script_writes_once() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("opcache-status-test.php");
        let probe = OpcacheProbe::new(&path, "test");

        probe.ensure_script().await.unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("opcache_get_status()"));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & !0o644 & 0o777, 0);

        probe.ensure_script().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), body);
    }

    #[tokio::test]
    async fn test_ensure_script_keeps_foreign_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("opcache-status-test.php");
        std::fs::write(&path, "<?php echo 'mine';").unwrap();

        OpcacheProbe::new(&path, "test").ensure_script().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<?php echo 'mine';");
    }

    #[test]
    fn test_decode_status() {
        let status: OpcacheStatus = serde_json::from_str(STATUS_JSON).unwrap();
        assert!(status.enabled);
        assert_eq!(status.memory.used_memory, 9437184);
        assert_eq!(status.statistics.num_cached_scripts, 42);
        assert_eq!(status.statistics.manual_restarts, 1);
    }

    #[tokio::test]
    async fn test_status_over_unix_socket() {
        let dir = tempdir().expect("Failed to create temp dir");
        let sock = dir.path().join("fpm.sock");
        let listener = UnixListener::bind(&sock).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let params = read_request(&mut stream).await.unwrap();
            let body = format!("Status: 200 OK\r\nContent-Type: application/json\r\n\r\n{STATUS_JSON}");
            write_response(&mut stream, body.as_bytes(), 0).await.unwrap();
            params
        });

        let probe = OpcacheProbe::new(dir.path().join("opcache-status-test.php"), "herakles-test");
        let status = probe
            .status(&format!("unix://{}", sock.display()), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(status.statistics.hits, 1000);

        let params = server.await.unwrap();
        assert!(params.contains(&("SCRIPT_NAME".to_string(), "/opcache-status-test.php".to_string())));
        assert!(params.contains(&("REMOTE_ADDR".to_string(), "127.0.0.1".to_string())));
        assert!(params.contains(&("SERVER_SOFTWARE".to_string(), "herakles-test".to_string())));
    }

    #[tokio::test]
    async fn test_status_errors() {
        let dir = tempdir().expect("Failed to create temp dir");
        let probe = OpcacheProbe::new(dir.path().join("opcache-status-test.php"), "test");

        let err = probe.status("bogus", Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, FpmError::Address(_)));

        let missing = dir.path().join("missing.sock");
        let err = probe
            .status(missing.to_str().unwrap(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, FpmError::FastCgi(_)));
    }

    #[tokio::test]
    async fn test_status_rejects_non_json() {
        let dir = tempdir().expect("Failed to create temp dir");
        let sock = dir.path().join("fpm.sock");
        let listener = UnixListener::bind(&sock).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await.unwrap();
            write_response(&mut stream, b"Content-Type: application/json\r\n\r\nfalse", 0)
                .await
                .unwrap();
        });

        let probe = OpcacheProbe::new(dir.path().join("opcache-status-test.php"), "test");
        let err = probe
            .status(sock.to_str().unwrap(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, FpmError::Json(_)));
    }
}
