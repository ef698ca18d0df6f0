//! Startup requirement validation for herakles-fpm-exporter.
//!
//! Discovery reads other users' `/proc/<pid>/{cmdline,exe}` entries. Without
//! enough privileges those reads fail and pools go missing silently, so the
//! checks here warn up front. None of them stop the agent.

use nix::unistd::geteuid;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Validate all runtime requirements
pub fn validate_requirements(proc_root: &Path) -> Result<(), ValidationError> {
    info!("Validating runtime requirements...");

    check_user_privileges();
    if let Err(e) = check_proc_access(proc_root) {
        warn!("{}", e);
        warn!("   Discovery may miss FPM masters owned by other users");
        warn!("   Run as root or grant cap_dac_read_search,cap_sys_ptrace");
        return Err(e);
    }

    info!("All runtime requirements validated");
    Ok(())
}

fn check_user_privileges() {
    if !geteuid().is_root() {
        warn!("Not running as root - may not be able to inspect all FPM masters");
    } else {
        info!("Running as root (uid=0)");
    }
}

/// Probes `<proc_root>/1/cmdline`, which only privileged users can read on
/// hardened systems.
pub fn check_proc_access(proc_root: &Path) -> Result<(), ValidationError> {
    let probe = proc_root.join("1").join("cmdline");
    match fs::read(&probe) {
        Ok(_) => {
            info!("/proc access: can read {}", probe.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(
            ValidationError::InsufficientPermissions(format!("{}: {}", probe.display(), e)),
        ),
        Err(e) => Err(ValidationError::ProcUnavailable(format!(
            "{}: {}",
            probe.display(),
            e
        ))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("Process table not readable: {0}")]
    ProcUnavailable(String),
}
