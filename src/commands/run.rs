//! Run command implementation: the long-running agent mode.

use herakles_fpm_exporter::collector::Collector;
use herakles_fpm_exporter::config::Config;
use herakles_fpm_exporter::fpm::CollectionResult;
use herakles_fpm_exporter::startup_checks;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::Services;

pub async fn command_run(mut config: Config) -> anyhow::Result<()> {
    if let Err(e) = startup_checks::validate_requirements(Path::new("/proc")) {
        error!("Startup validation failed: {}", e);
        error!("   The exporter will start but may miss pools!");
    }

    if !config.fpm_enabled() {
        warn!("PHP-FPM collection is disabled (phpfpm.enabled = false), nothing to do");
        return Ok(());
    }

    let services = Services::from_config(&config);
    if config.autodiscover() {
        services.discover_into(&mut config).await;
    }

    let pools = config.phpfpm.pools.clone();
    if pools.is_empty() {
        warn!("No FPM pools to poll - waiting for shutdown");
    }
    for pool in &pools {
        info!(
            socket = %pool.socket,
            status_path = %pool.status_path,
            interval = ?pool.poll_interval(config.poll_interval()),
            "Polling pool"
        );
    }

    let collector = Arc::new(Collector::new(
        Arc::clone(&services.client),
        pools,
        config.poll_interval(),
    ));
    collector.add_listener(Arc::new(|socket: &str, result: &CollectionResult| {
        for (name, pool) in &result.pools {
            debug!(
                socket,
                pool = %name,
                active = pool.active_processes,
                idle = pool.idle_processes,
                listen_queue = pool.listen_queue,
                "Pool status collected"
            );
        }
    }));

    let (tx, rx) = watch::channel(false);
    let task = {
        let collector = Arc::clone(&collector);
        tokio::spawn(async move { collector.run_per_pool(rx).await })
    };

    shutdown_signal().await;
    info!("Shutdown signal received, stopping pool collectors...");
    let _ = tx.send(true);
    if let Err(e) = task.await {
        error!("Collector task failed: {}", e);
    }

    info!("{}", services.client.stats().render_summary());
    info!("herakles-fpm-exporter stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_disabled_agent_returns_immediately() {
        let mut config = Config::default();
        config.phpfpm.enabled = Some(false);
        let outcome = tokio::time::timeout(Duration::from_secs(5), command_run(config))
            .await
            .expect("run did not return");
        assert!(outcome.is_ok());
    }
}
