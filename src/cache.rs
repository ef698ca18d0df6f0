//! Cache entry state shared by the TTL caches.
//!
//! A lookup that failed is remembered as [`CacheEntry::Failed`], distinct
//! from [`CacheEntry::Absent`] ("never attempted"), so that a broken binary
//! is not re-invoked on every collection tick while its failure is still
//! within the cache window.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tri-state cache slot.
#[derive(Debug, Clone)]
pub enum CacheEntry<T> {
    Absent,
    Ready { value: Arc<T>, refreshed_at: Instant },
    Failed { error: String, refreshed_at: Instant },
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        CacheEntry::Absent
    }
}

impl<T> CacheEntry<T> {
    pub fn ready(value: Arc<T>) -> Self {
        CacheEntry::Ready {
            value,
            refreshed_at: Instant::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        CacheEntry::Failed {
            error: error.into(),
            refreshed_at: Instant::now(),
        }
    }

    pub fn refreshed_at(&self) -> Option<Instant> {
        match self {
            CacheEntry::Absent => None,
            CacheEntry::Ready { refreshed_at, .. } | CacheEntry::Failed { refreshed_at, .. } => {
                Some(*refreshed_at)
            }
        }
    }

    /// Returns the cached outcome if it was refreshed less than `ttl` ago.
    pub fn fresh(&self, ttl: Duration, now: Instant) -> Option<Result<Arc<T>, String>> {
        let refreshed_at = self.refreshed_at()?;
        if now.saturating_duration_since(refreshed_at) >= ttl {
            return None;
        }
        match self {
            CacheEntry::Ready { value, .. } => Some(Ok(Arc::clone(value))),
            CacheEntry::Failed { error, .. } => Some(Err(error.clone())),
            CacheEntry::Absent => None,
        }
    }

    /// Moves the refresh timestamp `by` into the past.
    pub fn backdate(&mut self, by: Duration) {
        match self {
            CacheEntry::Absent => {}
            CacheEntry::Ready { refreshed_at, .. } | CacheEntry::Failed { refreshed_at, .. } => {
                if let Some(earlier) = refreshed_at.checked_sub(by) {
                    *refreshed_at = earlier;
                }
            }
        }
    }
}
