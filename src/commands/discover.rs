//! Discover command implementation.

use anyhow::Context;
use herakles_fpm_exporter::config::Config;

use super::Services;

/// Scans for FPM masters and prints the discovered pools as JSON.
pub async fn command_discover(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config);
    let pools = services
        .discovery()
        .discover()
        .await
        .context("FPM discovery failed")?;

    if pools.is_empty() {
        eprintln!("No running PHP-FPM masters found");
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&pools).context("Failed to serialize pools")?
    );
    Ok(())
}
