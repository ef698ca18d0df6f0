//! Collection statistics.
//!
//! Tracks, per pool socket, how many collection ticks succeeded or failed and
//! how long they took. Both the batch and the per-pool paths record here.

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Running statistics for a single metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Debug, Default)]
struct PoolStats {
    successes: u64,
    failures: u64,
    duration_ms: RunningStat,
    last_error: Option<String>,
    last_success: Option<DateTime<Utc>>,
}

/// Serializable view of one pool's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStatsSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub last_duration_ms: f64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub pools: BTreeMap<String, PoolStatsSnapshot>,
}

pub struct CollectionStats {
    started: Instant,
    pools: Mutex<HashMap<String, PoolStats>>,
}

impl Default for CollectionStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            pools: Mutex::new(HashMap::new()),
        }
    }
}

impl CollectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, socket: &str, took: Duration) {
        let mut pools = self.lock();
        let entry = pools.entry(socket.to_string()).or_default();
        entry.successes += 1;
        entry.duration_ms.add(took.as_secs_f64() * 1000.0);
        entry.last_success = Some(Utc::now());
    }

    pub fn record_failure(&self, socket: &str, took: Duration, error: &str) {
        let mut pools = self.lock();
        let entry = pools.entry(socket.to_string()).or_default();
        entry.failures += 1;
        entry.duration_ms.add(took.as_secs_f64() * 1000.0);
        entry.last_error = Some(error.to_string());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let pools = self
            .lock()
            .iter()
            .map(|(socket, s)| {
                let d = &s.duration_ms;
                (
                    socket.clone(),
                    PoolStatsSnapshot {
                        successes: s.successes,
                        failures: s.failures,
                        last_duration_ms: d.last,
                        avg_duration_ms: d.avg(),
                        min_duration_ms: d.min,
                        max_duration_ms: d.max,
                        last_error: s.last_error.clone(),
                        last_success: s.last_success,
                    },
                )
            })
            .collect();

        StatsSnapshot {
            uptime_seconds: self.started.elapsed().as_secs(),
            pools,
        }
    }

    /// One line per pool, for shutdown logging.
    pub fn render_summary(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        let _ = writeln!(out, "collection summary after {}s:", snapshot.uptime_seconds);
        for (socket, s) in &snapshot.pools {
            let _ = writeln!(
                out,
                "  {socket}: ok={} failed={} avg={:.1}ms min={:.1}ms max={:.1}ms",
                s.successes, s.failures, s.avg_duration_ms, s.min_duration_ms, s.max_duration_ms
            );
        }
        out
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PoolStats>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
