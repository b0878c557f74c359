//! Inquiry loop feeding the dispatch pool.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::hardware::{Detection, PushTransport, ScanEvent, ScanSource};
use crate::pool::DispatchPool;

/// Counters for one inquiry session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Devices reported by the radio.
    pub detections: usize,
    /// Detections strong enough to offer to the pool.
    pub qualified: usize,
    /// Detections the pool admitted and started pushing to.
    pub dispatched: usize,
    /// Reads that failed and were skipped.
    pub read_errors: usize,
}

/// Drives inquiry sessions back to back and offers every sufficiently
/// strong detection to the dispatch pool.
pub struct DeviceScanner<S: ScanSource, T: PushTransport> {
    source: S,
    pool: Arc<DispatchPool<T>>,
    rssi_threshold: i16,
}

impl<S: ScanSource, T: PushTransport> DeviceScanner<S, T> {
    /// Create a scanner. Detections must be strictly stronger than
    /// `rssi_threshold` dBm to qualify.
    pub const fn new(source: S, pool: Arc<DispatchPool<T>>, rssi_threshold: i16) -> Self {
        Self {
            source,
            pool,
            rssi_threshold,
        }
    }

    /// Whether a detection is close enough to serve.
    #[must_use]
    pub fn qualifies(&self, detection: &Detection) -> bool {
        detection.rssi.is_some_and(|rssi| rssi > self.rssi_threshold)
    }

    /// Run sessions until the hardware fails.
    ///
    /// # Errors
    ///
    /// Returns the first fatal hardware error.
    pub async fn run(mut self) -> Result<()> {
        info!(threshold_dbm = self.rssi_threshold, "Device scanner started");
        loop {
            let summary = self.run_session().await.map_err(|e| {
                error!(error = %e, code = e.error_code(), "Scanning stopped");
                e
            })?;
            info!(
                detections = summary.detections,
                qualified = summary.qualified,
                dispatched = summary.dispatched,
                busy_slots = self.pool.busy_count(),
                "Scanning done"
            );
        }
    }

    /// Run one inquiry session to completion.
    ///
    /// # Errors
    ///
    /// Returns any error that is not a transient read failure.
    pub async fn run_session(&mut self) -> Result<SessionSummary> {
        let mut summary = SessionSummary::default();
        self.source.start_session().await?;
        debug!("Starting inquiry with RSSI");

        loop {
            match self.source.next_event().await {
                Ok(ScanEvent::SessionComplete) => return Ok(summary),
                Ok(ScanEvent::Detection(detection)) => {
                    summary.detections += 1;
                    debug!(device = %detection.address, rssi = ?detection.rssi, "Detected");
                    if !self.qualifies(&detection) {
                        continue;
                    }
                    summary.qualified += 1;
                    if self.pool.allocate(&detection.address).is_some() {
                        summary.dispatched += 1;
                    }
                }
                Err(e) if e.is_transient() => {
                    summary.read_errors += 1;
                    warn!(error = %e, "Skipping failed inquiry read");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BeaconConfig;
    use crate::dedup::DedupCache;
    use crate::error::BeaconError;
    use crate::mock::{MockPushTransport, MockScanSource};
    use crate::types::DeviceIdentity;

    fn detection(address: &str, rssi: Option<i16>) -> ScanEvent {
        ScanEvent::Detection(Detection {
            address: DeviceIdentity::parse(address).unwrap(),
            rssi,
        })
    }

    fn pool(transport: MockPushTransport) -> Arc<DispatchPool<MockPushTransport>> {
        let config = BeaconConfig::default();
        let dedup = DedupCache::from_config(&config.dedup).shared();
        Arc::new(DispatchPool::new(&config.push, dedup, Arc::new(transport)))
    }

    #[tokio::test]
    async fn test_strong_detection_is_dispatched() {
        let transport = MockPushTransport::new();
        let pool = pool(transport.clone());
        let source = MockScanSource::new(vec![vec![Ok(detection("AA:BB:CC:DD:EE:01", Some(-50)))]]);
        let mut scanner = DeviceScanner::new(source, Arc::clone(&pool), -60);

        let summary = scanner.run_session().await.unwrap();
        assert_eq!(summary.detections, 1);
        assert_eq!(summary.dispatched, 1);
    }

    #[tokio::test]
    async fn test_weak_or_unknown_signal_is_ignored() {
        let transport = MockPushTransport::new();
        let pool = pool(transport.clone());
        let source = MockScanSource::new(vec![vec![
            Ok(detection("AA:BB:CC:DD:EE:02", Some(-70))),
            Ok(detection("AA:BB:CC:DD:EE:03", Some(-60))),
            Ok(detection("AA:BB:CC:DD:EE:04", None)),
        ]]);
        let mut scanner = DeviceScanner::new(source, Arc::clone(&pool), -60);

        let summary = scanner.run_session().await.unwrap();
        assert_eq!(summary.detections, 3);
        assert_eq!(summary.qualified, 0);
        assert_eq!(pool.busy_count(), 0);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_detection_in_session_dispatches_once() {
        let (transport, gate) = MockPushTransport::gated();
        let pool = pool(transport);
        let source = MockScanSource::new(vec![vec![
            Ok(detection("AA:BB:CC:DD:EE:01", Some(-40))),
            Ok(detection("AA:BB:CC:DD:EE:01", Some(-42))),
        ]]);
        let mut scanner = DeviceScanner::new(source, Arc::clone(&pool), -60);

        let summary = scanner.run_session().await.unwrap();
        assert_eq!(summary.qualified, 2);
        assert_eq!(summary.dispatched, 1);
        gate.add_permits(1);
    }

    #[tokio::test]
    async fn test_transient_read_error_is_skipped() {
        let pool = pool(MockPushTransport::new());
        let source = MockScanSource::new(vec![vec![
            Err(BeaconError::ScanReadFailed("short read".into())),
            Ok(detection("AA:BB:CC:DD:EE:05", Some(-30))),
        ]]);
        let mut scanner = DeviceScanner::new(source, pool, -60);

        let summary = scanner.run_session().await.unwrap();
        assert_eq!(summary.read_errors, 1);
        assert_eq!(summary.dispatched, 1);
    }

    #[tokio::test]
    async fn test_run_restarts_sessions_until_hardware_fails() {
        let pool = pool(MockPushTransport::new());
        let source = MockScanSource::new(vec![
            vec![Ok(detection("AA:BB:CC:DD:EE:01", Some(-50)))],
            vec![Ok(detection("AA:BB:CC:DD:EE:02", Some(-50)))],
        ]);
        let sessions = source.sessions_started();
        let scanner = DeviceScanner::new(source, Arc::clone(&pool), -60);

        let err = scanner.run().await.unwrap_err();
        assert!(err.is_fatal_hardware());
        assert_eq!(sessions.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(crate::dedup::lock(&pool.dedup()).len(), 2);
    }

    #[tokio::test]
    async fn test_fatal_read_error_stops_session() {
        let pool = pool(MockPushTransport::new());
        let source = MockScanSource::new(vec![vec![Err(BeaconError::AdapterUnavailable {
            adapter: "hci1".into(),
            message: "removed".into(),
        })]]);
        let mut scanner = DeviceScanner::new(source, pool, -60);

        assert!(scanner.run_session().await.unwrap_err().is_fatal_hardware());
    }
}
