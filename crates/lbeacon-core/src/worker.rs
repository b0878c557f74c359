//! One object push attempt.
//!
//! A [`PushWorker`] owns the slot lease for its attempt. It walks the push
//! sequence (open, discover, connect, transfer, disconnect, close) and the
//! lease is dropped when it finishes, whichever way it finishes, which
//! returns the slot to the pool.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::hardware::{PushLink, PushTransport};
use crate::pool::SlotLease;
use crate::types::{AdapterId, DeviceIdentity};

/// The file delivered to every served device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFile {
    /// Full path on the beacon.
    pub path: PathBuf,
    /// Name announced to the receiving device.
    pub name: String,
}

impl PushFile {
    /// Describe a file to push.
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// Steps of the push sequence, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushStep {
    /// Open the push adapter.
    Open,
    /// Find the target's object push channel.
    Discover,
    /// Open the object exchange session.
    Connect,
    /// Send the file.
    Transfer,
    /// End the object exchange session.
    Disconnect,
    /// Release the adapter.
    Close,
}

impl fmt::Display for PushStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Discover => "discover",
            Self::Connect => "connect",
            Self::Transfer => "transfer",
            Self::Disconnect => "disconnect",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// How a push attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The file was accepted by the device.
    Delivered,
    /// The session was set up but the transfer failed.
    TransferFailed,
    /// A setup step failed and the rest of the sequence was skipped.
    Aborted(PushStep),
}

/// Executes one push against one device on one adapter.
pub struct PushWorker<T: PushTransport> {
    lease: SlotLease,
    transport: Arc<T>,
    file: Arc<PushFile>,
}

impl<T: PushTransport> PushWorker<T> {
    pub(crate) fn new(lease: SlotLease, transport: Arc<T>, file: Arc<PushFile>) -> Self {
        Self {
            lease,
            transport,
            file,
        }
    }

    /// Run the push sequence to completion and release the slot.
    pub async fn run(self) -> PushOutcome {
        let span = info_span!(
            "push",
            slot = self.lease.index(),
            adapter = %self.lease.adapter(),
            device = %self.lease.identity(),
        );
        async move {
            let started = Instant::now();
            let outcome = self.push().await;
            info!(
                ?outcome,
                elapsed_ms = started.elapsed().as_millis(),
                "Push attempt finished"
            );
            // Dropping the lease here releases the slot.
            drop(self.lease);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn push(&self) -> PushOutcome {
        let target = self.lease.identity();
        let adapter: AdapterId = self.lease.adapter();

        let mut link = match self.transport.open(adapter).await {
            Ok(link) => link,
            Err(e) => {
                error!(error = %e, "Failed to open push adapter");
                return PushOutcome::Aborted(PushStep::Open);
            }
        };

        let outcome = Self::exchange(&mut link, target, &self.file).await;
        link.close().await;
        outcome
    }

    async fn exchange(link: &mut T::Link, target: &DeviceIdentity, file: &PushFile) -> PushOutcome {
        let channel = match link.discover_channel(target).await {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "Object push service not found");
                return PushOutcome::Aborted(PushStep::Discover);
            }
        };
        debug!(channel, "Found object push channel");

        if let Err(e) = link.connect(target, channel).await {
            error!(error = %e, channel, "Failed to connect for object push");
            return PushOutcome::Aborted(PushStep::Connect);
        }

        info!(file = %file.name, "Sending file");
        let outcome = match link.put_file(file).await {
            Ok(()) => PushOutcome::Delivered,
            Err(e) => {
                error!(error = %e, file = %file.name, "Error putting file");
                PushOutcome::TransferFailed
            }
        };

        if let Err(e) = link.disconnect().await {
            warn!(error = %e, "Error disconnecting the client");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPushTransport, PushCall};
    use crate::pool::SlotTable;
    use crate::types::DeviceIdentity;

    fn target() -> DeviceIdentity {
        DeviceIdentity::parse("AA:BB:CC:DD:EE:01").unwrap()
    }

    async fn run_with(transport: MockPushTransport) -> (PushOutcome, Vec<PushCall>, SlotTable) {
        let transport = Arc::new(transport);
        let table = SlotTable::new(2, 9).shared();
        let lease = SlotTable::claim_lease(&table, &target()).unwrap();
        let file = Arc::new(PushFile::new("/tmp/location.txt", "location.txt"));

        let outcome = PushWorker::new(lease, Arc::clone(&transport), file).run().await;
        let snapshot = crate::pool::lock(&table).clone();
        (outcome, transport.calls(), snapshot)
    }

    #[tokio::test]
    async fn test_successful_push_runs_every_step() {
        let (outcome, calls, table) = run_with(MockPushTransport::new()).await;

        assert_eq!(outcome, PushOutcome::Delivered);
        let steps: Vec<PushStep> = calls.iter().map(|c| c.step).collect();
        assert_eq!(
            steps,
            vec![
                PushStep::Open,
                PushStep::Discover,
                PushStep::Connect,
                PushStep::Transfer,
                PushStep::Disconnect,
                PushStep::Close,
            ]
        );
        assert_eq!(table.busy_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_skips_transfer_but_closes() {
        let (outcome, calls, table) =
            run_with(MockPushTransport::new().fail_at(PushStep::Connect)).await;

        assert_eq!(outcome, PushOutcome::Aborted(PushStep::Connect));
        let steps: Vec<PushStep> = calls.iter().map(|c| c.step).collect();
        assert_eq!(
            steps,
            vec![PushStep::Open, PushStep::Discover, PushStep::Connect, PushStep::Close]
        );
        assert_eq!(table.busy_count(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_releases_slot() {
        let (outcome, calls, table) =
            run_with(MockPushTransport::new().fail_at(PushStep::Open)).await;

        assert_eq!(outcome, PushOutcome::Aborted(PushStep::Open));
        assert_eq!(calls.len(), 1);
        assert_eq!(table.busy_count(), 0);
    }

    #[tokio::test]
    async fn test_transfer_failure_still_disconnects() {
        let (outcome, calls, table) =
            run_with(MockPushTransport::new().fail_at(PushStep::Transfer)).await;

        assert_eq!(outcome, PushOutcome::TransferFailed);
        let steps: Vec<PushStep> = calls.iter().map(|c| c.step).collect();
        assert!(steps.ends_with(&[PushStep::Transfer, PushStep::Disconnect, PushStep::Close]));
        assert_eq!(table.busy_count(), 0);
    }

    #[tokio::test]
    async fn test_worker_uses_assigned_adapter() {
        let (_, calls, _) = run_with(MockPushTransport::new()).await;
        assert!(calls.iter().all(|c| c.adapter == AdapterId(0)));
        assert!(calls.iter().all(|c| c.target.as_ref().map_or(true, |t| *t == target())));
    }
}
