//! Error types shared by discovery and collection.

use crate::fastcgi::FastCgiError;
use crate::fpm::address::AddressError;
use crate::process::CommandError;
use std::time::Duration;

/// Failure while collecting from a single pool or one of its enrichments.
#[derive(Debug, thiserror::Error)]
pub enum FpmError {
    #[error("invalid FPM socket address: {0}")]
    Address(#[from] AddressError),

    #[error(transparent)]
    FastCgi(#[from] FastCgiError),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("could not parse PHP version from output: {0}")]
    VersionNotFound(String),

    #[error("matching php-cli binary for version {0} not found")]
    CliBinaryNotFound(String),

    #[error("collection from {socket} timed out after {timeout:?}")]
    Timeout { socket: String, timeout: Duration },

    #[error("previously attempted, failed: {0}")]
    PreviousFailure(String),

    #[error("failed to write helper script {path}: {source}")]
    HelperScript {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The only hard discovery failure: the process table could not be read.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to list processes: {0}")]
    ListProcesses(#[source] std::io::Error),
}
