//! Collection scheduling.
//!
//! The [`Collector`] owns the shared result and error maps. It can run an
//! on-demand batch over all pools, a periodic batch loop, or one independent
//! task per pool on that pool's own interval. Shutdown is signalled through a
//! `watch` channel; per-pool tasks drop any in-flight request when it fires.

use crate::config::PoolConfig;
use crate::fpm::client::{BatchReport, PoolClient};
use crate::fpm::status::CollectionResult;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Observer called with the socket key and the result stored for it.
pub type Listener = Arc<dyn Fn(&str, &CollectionResult) + Send + Sync>;

pub struct Collector {
    client: Arc<PoolClient>,
    pools: Vec<PoolConfig>,
    poll_interval: Duration,
    results: RwLock<BTreeMap<String, CollectionResult>>,
    errors: RwLock<BTreeMap<String, String>>,
    listeners: StdRwLock<Vec<Listener>>,
}

impl Collector {
    pub fn new(client: Arc<PoolClient>, pools: Vec<PoolConfig>, poll_interval: Duration) -> Self {
        Self {
            client,
            pools,
            poll_interval,
            results: RwLock::new(BTreeMap::new()),
            errors: RwLock::new(BTreeMap::new()),
            listeners: StdRwLock::new(Vec::new()),
        }
    }

    pub fn pools(&self) -> &[PoolConfig] {
        &self.pools
    }

    pub fn client(&self) -> &PoolClient {
        &self.client
    }

    pub fn add_listener(&self, listener: Listener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, socket: &str, result: &CollectionResult) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(socket, result);
        }
    }

    /// Snapshot of the latest result per socket.
    pub async fn results(&self) -> BTreeMap<String, CollectionResult> {
        self.results.read().await.clone()
    }

    /// Snapshot of the latest error per socket. Cleared on the next success.
    pub async fn errors(&self) -> BTreeMap<String, String> {
        self.errors.read().await.clone()
    }

    /// Collects every pool once and stores the outcome.
    pub async fn collect(&self) -> BatchReport {
        let report = self.client.collect_all(&self.pools).await;

        {
            let mut results = self.results.write().await;
            for (socket, result) in &report.results {
                results.insert(socket.clone(), result.clone());
            }
        }
        {
            let mut errors = self.errors.write().await;
            for socket in report.results.keys() {
                errors.remove(socket);
            }
            for (socket, message) in &report.errors {
                errors.insert(socket.clone(), message.clone());
            }
        }

        for (socket, result) in &report.results {
            self.notify(socket, result);
        }
        report
    }

    /// Runs a batch collection every poll interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let report = self.collect().await;
                    debug!(
                        ok = report.results.len(),
                        failed = report.errors.len(),
                        "Batch collection finished"
                    );
                }
            }
        }
        info!("Batch collector stopped");
    }

    /// Spawns one task per pool, each on its own interval, and waits for all
    /// of them to stop after shutdown.
    pub async fn run_per_pool(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        let handles: Vec<_> = self
            .pools
            .iter()
            .cloned()
            .map(|pool| {
                let this = Arc::clone(self);
                let rx = shutdown.clone();
                tokio::spawn(async move { this.poll_pool(pool, rx).await })
            })
            .collect();

        info!("Started {} per-pool collectors", handles.len());

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Pool collector task failed: {}", e);
            }
        }
        info!("All pool collectors stopped");
    }

    async fn poll_pool(&self, pool: PoolConfig, mut shutdown: watch::Receiver<bool>) {
        let interval = pool.poll_interval(self.poll_interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(socket = %pool.socket, ?interval, "Pool collector started");

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = async {
                    ticker.tick().await;
                    self.collect_one(&pool).await;
                } => {}
            }
        }
        debug!(socket = %pool.socket, "Pool collector stopped");
    }

    /// One tick for one pool. A failure replaces the pool's slot with an
    /// empty result and records the error.
    pub async fn collect_one(&self, pool: &PoolConfig) {
        let result = match self.client.collect_pool_within(pool).await {
            Ok(result) => {
                self.errors.write().await.remove(&pool.socket);
                result
            }
            Err(e) => {
                warn!("Collection from {} failed: {}", pool.socket, e);
                self.errors
                    .write()
                    .await
                    .insert(pool.socket.clone(), e.to_string());
                CollectionResult::new()
            }
        };

        self.results
            .write()
            .await
            .insert(pool.socket.clone(), result.clone());
        self.notify(&pool.socket, &result);
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
