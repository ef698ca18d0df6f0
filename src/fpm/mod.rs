//! PHP-FPM specific functionality.
//!
//! This module provides:
//! - `address`: listen address parsing and socket resolution
//! - `config_dump`: parsing of `php-fpm -tt` output, cached per master
//! - `discovery`: finding running masters and their pools
//! - `status`: status page model and derived per-pool statistics
//! - `php_info`: PHP version and extension probing
//! - `opcache`: opcache statistics through a helper script
//! - `client`: per-pool collection over FastCGI

pub mod address;
pub mod client;
pub mod config_dump;
pub mod discovery;
pub mod opcache;
pub mod php_info;
pub mod status;

pub use address::{parse_address, parse_endpoint, Endpoint, Scheme};
pub use client::{BatchReport, PoolClient};
pub use config_dump::{FpmConfigCache, FpmStaticConfig};
pub use discovery::{DiscoveredPool, Discovery};
pub use opcache::{OpcacheProbe, OpcacheStatus};
pub use php_info::{PhpInfoCache, PhpRuntimeInfo};
pub use status::{CollectionResult, PoolSnapshot, ProcessSnapshot};
