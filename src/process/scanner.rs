//! Process scanning utilities for discovering FPM master processes in /proc.
//!
//! This module provides the [`ProcessSource`] capability used by discovery and
//! its default implementation, which reads process names, command lines and
//! executable paths from the /proc filesystem.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};

/// One host process as seen by discovery.
///
/// Fields are optional because any of them can be unreadable for processes
/// owned by other users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: Option<String>,
    pub cmdline: Option<String>,
    pub exe: Option<PathBuf>,
}

/// Enumerates host processes.
#[async_trait]
pub trait ProcessSource: Send + Sync {
    /// Lists all visible processes. Fails only when the process table itself
    /// cannot be read.
    async fn processes(&self) -> std::io::Result<Vec<ProcessInfo>>;
}

/// [`ProcessSource`] reading a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcScanner {
    root: PathBuf,
}

impl ProcScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcScanner {
    fn default() -> Self {
        Self::new("/proc")
    }
}

#[async_trait]
impl ProcessSource for ProcScanner {
    async fn processes(&self) -> std::io::Result<Vec<ProcessInfo>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_processes(&root))
            .await
            .map_err(std::io::Error::other)?
    }
}

/// Scans `root` for numeric PID directories and reads each one.
pub fn scan_processes(root: &Path) -> std::io::Result<Vec<ProcessInfo>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(root)?.flatten() {
        let p = entry.path();
        let name = match p.file_name().and_then(|s| s.to_str()) {
            Some(v) => v,
            None => continue,
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let pid: u32 = match name.parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        out.push(ProcessInfo {
            pid,
            name: read_process_name(&p),
            cmdline: read_cmdline(&p),
            exe: fs::read_link(p.join("exe")).ok(),
        });
    }
    Ok(out)
}

/// Reads process name from comm file or extracts from cmdline.
pub fn read_process_name(proc_path: &Path) -> Option<String> {
    if let Ok(s) = fs::read_to_string(proc_path.join("comm")) {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.into());
        }
    }

    let content = fs::read(proc_path.join("cmdline")).ok()?;
    let first = content.split(|&b| b == 0u8).next()?;
    let first = std::str::from_utf8(first).ok()?;
    // FPM rewrites its title to "php-fpm: master process (...)"
    let first = first.split(':').next().unwrap_or(first);
    Path::new(first.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

/// Reads the full command line with NUL separators turned into spaces.
pub fn read_cmdline(proc_path: &Path) -> Option<String> {
    let content = fs::read(proc_path.join("cmdline")).ok()?;
    if content.is_empty() {
        return None;
    }
    let joined = content
        .split(|&b| b == 0u8)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    Some(joined.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fake_proc(root: &Path, pid: &str, comm: Option<&str>, cmdline: &[u8]) {
        let dir = root.join(pid);
        fs::create_dir_all(&dir).unwrap();
        if let Some(comm) = comm {
            fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
        }
        fs::write(dir.join("cmdline"), cmdline).unwrap();
    }

    #[test]
    fn test_scan_processes_reads_numeric_dirs_only() {
        let dir = tempdir().expect("Failed to create temp dir");
        fake_proc(
            dir.path(),
            "101",
            Some("php-fpm8.2"),
            b"php-fpm: master process (/etc/php/8.2/fpm/php-fpm.conf)",
        );
        fake_proc(dir.path(), "102", Some("nginx"), b"nginx\0-g\0daemon off;\0");
        fs::create_dir_all(dir.path().join("self")).unwrap();
        fs::write(dir.path().join("uptime"), "1 1").unwrap();

        let mut procs = scan_processes(dir.path()).unwrap();
        procs.sort_by_key(|p| p.pid);

        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].pid, 101);
        assert_eq!(procs[0].name.as_deref(), Some("php-fpm8.2"));
        assert_eq!(
            procs[0].cmdline.as_deref(),
            Some("php-fpm: master process (/etc/php/8.2/fpm/php-fpm.conf)")
        );
        assert_eq!(procs[0].exe, None);
        assert_eq!(procs[1].cmdline.as_deref(), Some("nginx -g daemon off;"));
    }

    #[test]
    fn test_read_process_name_falls_back_to_cmdline() {
        let dir = tempdir().expect("Failed to create temp dir");
        fake_proc(
            dir.path(),
            "7",
            None,
            b"/usr/sbin/php-fpm8.1\0--nodaemonize\0",
        );
        assert_eq!(
            read_process_name(&dir.path().join("7")).as_deref(),
            Some("php-fpm8.1")
        );
    }

    #[test]
    fn test_read_cmdline_empty_is_none() {
        let dir = tempdir().expect("Failed to create temp dir");
        fake_proc(dir.path(), "9", Some("kthreadd"), b"");
        assert_eq!(read_cmdline(&dir.path().join("9")), None);
    }

    #[test]
    fn test_missing_root_is_error() {
        assert!(scan_processes(Path::new("/non/existent/proc")).is_err());
    }
}
