//! Herakles PHP-FPM Exporter Library
//!
//! Discovers running PHP-FPM masters, resolves their pools and collects each
//! pool's status page over FastCGI. Results are enriched with the pool's
//! static configuration, PHP runtime details and opcache statistics.
//!
//! # Usage
//!
//! ```rust,no_run
//! use herakles_fpm_exporter::config::PoolConfig;
//! use herakles_fpm_exporter::fpm::{FpmConfigCache, OpcacheProbe, PhpInfoCache, PoolClient};
//! use herakles_fpm_exporter::process::{CommandRunner, SystemCommandRunner};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new(Duration::from_secs(5)));
//! let client = PoolClient::new(
//!     Arc::new(FpmConfigCache::new(Arc::clone(&runner))),
//!     Arc::new(PhpInfoCache::new(runner, Duration::from_secs(3600))),
//!     OpcacheProbe::default(),
//!     "php",
//!     Duration::from_secs(2),
//! );
//!
//! let pool = PoolConfig {
//!     socket: "unix:///run/php/php8.2-fpm.sock".into(),
//!     status_path: "/status".into(),
//!     ..Default::default()
//! };
//! let result = client.collect_pool(&pool).await;
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod fastcgi;
pub mod fpm;
pub mod process;
pub mod startup_checks;
pub mod stats;

/// Value sent as `SERVER_SOFTWARE` on every FastCGI request.
pub const SERVER_SOFTWARE: &str = "herakles-fpm-exporter";

// Re-export main types for convenience
pub use collector::Collector;
pub use config::{Config, PoolConfig};
pub use error::{DiscoveryError, FpmError};
pub use fpm::{BatchReport, CollectionResult, DiscoveredPool, Discovery, PoolClient};
