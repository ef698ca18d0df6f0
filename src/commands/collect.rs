//! Collect command implementation.
//!
//! Runs one batch over every configured (and optionally discovered) pool and
//! prints the report. Fails only when every pool failed.

use anyhow::{bail, Context};
use herakles_fpm_exporter::config::Config;
use tracing::warn;

use super::Services;

pub async fn command_collect(mut config: Config, configured_only: bool) -> anyhow::Result<()> {
    if !config.fpm_enabled() {
        warn!("PHP-FPM collection is disabled (phpfpm.enabled = false), nothing to collect");
        return Ok(());
    }

    let services = Services::from_config(&config);

    if !configured_only && config.autodiscover() {
        services.discover_into(&mut config).await;
    }
    if config.phpfpm.pools.is_empty() {
        warn!("No FPM pools configured or discovered");
    }

    let report = services.client.collect_all(&config.phpfpm.pools).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );

    if report.results.is_empty() && !report.errors.is_empty() {
        bail!("All {} pools failed", report.errors.len());
    }
    Ok(())
}
