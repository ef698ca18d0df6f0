//! Pool status data model and derived per-pool figures.
//!
//! Field names follow the JSON emitted by FPM's status page with
//! `?json&full`, so the payload deserializes straight into [`PoolSnapshot`].

use crate::fpm::opcache::{OpcacheStatus, OPCACHE_URI_PREFIX};
use crate::fpm::php_info::PhpRuntimeInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One worker process from the full status listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSnapshot {
    pub pid: i64,
    pub state: String,
    #[serde(rename = "start time")]
    pub start_time: i64,
    #[serde(rename = "start since")]
    pub start_since: i64,
    pub requests: i64,
    #[serde(rename = "request duration")]
    pub request_duration: i64,
    #[serde(rename = "request method")]
    pub request_method: String,
    #[serde(rename = "request uri")]
    pub request_uri: String,
    #[serde(rename = "content length")]
    pub content_length: i64,
    pub user: String,
    pub script: String,
    #[serde(rename = "last request cpu")]
    pub last_request_cpu: f64,
    #[serde(rename = "last request memory")]
    pub last_request_memory: f64,
}

/// One pool's live status at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSnapshot {
    pub address: String,
    pub path: String,
    #[serde(rename = "pool")]
    pub name: String,
    #[serde(rename = "process manager")]
    pub process_manager: String,
    #[serde(rename = "start time")]
    pub start_time: i64,
    #[serde(rename = "start since")]
    pub start_since: i64,
    #[serde(rename = "accepted conn")]
    pub accepted_connections: i64,
    #[serde(rename = "listen queue")]
    pub listen_queue: i64,
    #[serde(rename = "max listen queue")]
    pub max_listen_queue: i64,
    #[serde(rename = "listen queue len")]
    pub listen_queue_length: i64,
    #[serde(rename = "idle processes")]
    pub idle_processes: i64,
    #[serde(rename = "active processes")]
    pub active_processes: i64,
    #[serde(rename = "total processes")]
    pub total_processes: i64,
    #[serde(rename = "max active processes")]
    pub max_active_processes: i64,
    #[serde(rename = "max children reached")]
    pub max_children_reached: i64,
    #[serde(rename = "slow requests")]
    pub slow_requests: i64,
    #[serde(rename = "memory peak")]
    pub memory_peak: i64,
    pub processes: Vec<ProcessSnapshot>,
    #[serde(rename = "processes_cpu", skip_serializing_if = "Option::is_none")]
    pub processes_cpu: Option<f64>,
    #[serde(rename = "processes_memory", skip_serializing_if = "Option::is_none")]
    pub processes_memory: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, String>>,
    #[serde(rename = "php_info", skip_serializing_if = "Option::is_none")]
    pub php_info: Option<PhpRuntimeInfo>,
    #[serde(rename = "opcache_status", skip_serializing_if = "Option::is_none")]
    pub opcache_status: Option<OpcacheStatus>,
}

/// Collection output for one status socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionResult {
    pub timestamp: DateTime<Utc>,
    pub pools: BTreeMap<String, PoolSnapshot>,
    #[serde(rename = "global_config", skip_serializing_if = "Option::is_none")]
    pub global: Option<BTreeMap<String, String>>,
}

impl CollectionResult {
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            pools: BTreeMap::new(),
            global: None,
        }
    }
}

impl Default for CollectionResult {
    fn default() -> Self {
        Self::new()
    }
}

/// How a worker state counts towards the pool totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessActivity {
    Active,
    Idle,
    Other,
}

/// Classifies an FPM worker state label, ignoring case.
pub fn classify_state(state: &str) -> ProcessActivity {
    match state.to_ascii_lowercase().as_str() {
        "running" | "reading headers" | "info" | "finishing" | "ending" => ProcessActivity::Active,
        "idle" => ProcessActivity::Idle,
        _ => ProcessActivity::Other,
    }
}

impl PoolSnapshot {
    /// Recomputes process counts from the process list and averages CPU and
    /// memory over the requests that were not our own status or opcache
    /// probes.
    pub fn recompute_derived(&mut self, status_path: &str) {
        let mut active = 0i64;
        let mut idle = 0i64;
        let mut cpu_sum = 0.0;
        let mut mem_sum = 0.0;
        let mut counted = 0usize;

        for proc in &self.processes {
            match classify_state(&proc.state) {
                ProcessActivity::Active => active += 1,
                ProcessActivity::Idle => idle += 1,
                ProcessActivity::Other => {}
            }

            let own_status = !status_path.is_empty() && proc.request_uri.starts_with(status_path);
            let own_opcache = proc.request_uri.starts_with(OPCACHE_URI_PREFIX);
            if !own_status && !own_opcache {
                cpu_sum += proc.last_request_cpu;
                mem_sum += proc.last_request_memory;
                counted += 1;
            }
        }

        self.active_processes = active;
        self.idle_processes = idle;
        self.total_processes = self.processes.len() as i64;

        if counted > 0 {
            self.processes_cpu = Some(cpu_sum / counted as f64);
            self.processes_memory = Some(mem_sum / counted as f64);
        } else {
            self.processes_cpu = None;
            self.processes_memory = None;
        }
    }
}
