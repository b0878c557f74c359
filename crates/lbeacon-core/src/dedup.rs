//! Time-windowed registry of recently served devices.
//!
//! A device is tracked when the dispatch pool admits it and stays tracked
//! until the janitor sweeps it out, `timeout` after it was first seen. While
//! tracked it cannot be admitted again. The cache is bounded: when full, new
//! devices are turned away until something expires. Nothing is ever
//! displaced to make room.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DedupConfig;
use crate::types::DeviceIdentity;

/// One tracked device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    /// The device.
    pub identity: DeviceIdentity,
    /// When it was admitted.
    pub first_seen_at: Instant,
}

/// Bounded set of recently served identities.
#[derive(Debug, Clone)]
pub struct DedupCache {
    entries: Vec<DedupEntry>,
    capacity: usize,
    timeout: Duration,
}

/// Handle shared between the dispatch pool and the janitor.
pub type SharedDedupCache = Arc<Mutex<DedupCache>>;

impl DedupCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            timeout,
        }
    }

    /// Create an empty cache from configuration.
    #[must_use]
    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.capacity, config.timeout())
    }

    /// Wrap the cache for sharing across tasks.
    #[must_use]
    pub fn shared(self) -> SharedDedupCache {
        Arc::new(Mutex::new(self))
    }

    /// Whether `id` is currently tracked.
    #[must_use]
    pub fn is_tracked(&self, id: &DeviceIdentity) -> bool {
        self.entries.iter().any(|entry| &entry.identity == id)
    }

    /// Start tracking `id` as of `now`.
    ///
    /// Returns `false` without touching the cache if `id` is already tracked
    /// or the cache is full.
    pub fn try_track(&mut self, id: &DeviceIdentity, now: Instant) -> bool {
        if self.is_tracked(id) || self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(DedupEntry {
            identity: id.clone(),
            first_seen_at: now,
        });
        true
    }

    /// Drop every entry older than the timeout. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.entries.len();
        self.entries.retain(|entry| {
            let age = now.saturating_duration_since(entry.first_seen_at);
            if age > timeout {
                tracing::debug!(device = %entry.identity, age_ms = age.as_millis(), "Dedup entry expired");
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of live entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The dedup window.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Lock a shared cache, recovering the data if a holder panicked.
///
/// Every mutation is a single push or retain, so a poisoned cache is still
/// consistent.
pub(crate) fn lock(cache: &Mutex<DedupCache>) -> MutexGuard<'_, DedupCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}
