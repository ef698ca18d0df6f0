//! Host process and subprocess capabilities.
//!
//! This module provides:
//! - `scanner`: process enumeration from /proc
//! - `command`: external command execution with timeouts

pub mod command;
pub mod scanner;

// Re-export commonly used types
pub use command::{
    CommandError, CommandOutput, CommandRunner, SystemCommandRunner, DEFAULT_COMMAND_TIMEOUT,
};
pub use scanner::{ProcScanner, ProcessInfo, ProcessSource};
