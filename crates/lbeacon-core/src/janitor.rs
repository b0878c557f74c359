//! Background eviction of expired dedup entries.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dedup::{self, SharedDedupCache};

/// Shortest sweep period; a zero interval is raised to this.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically sweeps the dedup cache so served devices become eligible
/// again once their window has passed.
#[derive(Debug, Clone)]
pub struct CacheJanitor {
    cache: SharedDedupCache,
    interval: Duration,
}

impl CacheJanitor {
    /// Create a janitor sweeping `cache` every `interval`.
    ///
    /// A zero `interval` is raised to [`MIN_SWEEP_INTERVAL`].
    #[must_use]
    pub fn new(cache: SharedDedupCache, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!("Zero dedup sweep interval, using {MIN_SWEEP_INTERVAL:?}");
            MIN_SWEEP_INTERVAL
        } else {
            interval
        };
        Self { cache, interval }
    }

    /// Time between sweeps.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep once now. Returns the number of evicted entries.
    pub fn sweep_once(&self) -> usize {
        let mut cache = dedup::lock(&self.cache);
        let evicted = cache.sweep(Instant::now());
        if evicted > 0 {
            debug!(evicted, remaining = cache.len(), "Dedup sweep");
        }
        evicted
    }

    /// Sweep forever.
    pub async fn run(self) {
        info!(interval_ms = self.interval.as_millis(), "Dedup janitor started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_once();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupCache;
    use crate::types::DeviceIdentity;

    fn id(n: u8) -> DeviceIdentity {
        DeviceIdentity::from_bytes([0, 0, 0, 0, 0, n])
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_once_only_removes_expired() {
        let cache = DedupCache::new(30, Duration::from_secs(20)).shared();
        let janitor = CacheJanitor::new(cache.clone(), Duration::from_secs(1));

        dedup::lock(&cache).try_track(&id(1), Instant::now());
        tokio::time::advance(Duration::from_secs(10)).await;
        dedup::lock(&cache).try_track(&id(2), Instant::now());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(janitor.sweep_once(), 1);
        assert!(!dedup::lock(&cache).is_tracked(&id(1)));
        assert!(dedup::lock(&cache).is_tracked(&id(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_evicts_in_background() {
        let cache = DedupCache::new(30, Duration::from_secs(20)).shared();
        dedup::lock(&cache).try_track(&id(1), Instant::now());

        let task = tokio::spawn(CacheJanitor::new(cache.clone(), Duration::from_secs(1)).run());

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(dedup::lock(&cache).is_tracked(&id(1)));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(dedup::lock(&cache).is_empty());

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised() {
        let cache = DedupCache::new(30, Duration::from_millis(10)).shared();
        dedup::lock(&cache).try_track(&id(1), Instant::now());

        let janitor = CacheJanitor::new(cache.clone(), Duration::ZERO);
        assert_eq!(janitor.interval(), MIN_SWEEP_INTERVAL);

        let task = tokio::spawn(janitor.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dedup::lock(&cache).is_empty());

        task.abort();
    }
}
