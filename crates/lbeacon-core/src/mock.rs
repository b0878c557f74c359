//! Scripted hardware for tests and radio-less runs.
//!
//! - [`MockScanSource`] replays scripted inquiry sessions, or produces empty
//!   sessions forever in idle mode.
//! - [`MockPushTransport`] records every push step, can fail any step, and
//!   can hold workers mid-transfer until a gate is opened.
//! - [`MockControlRadio`] records connections and payloads sent to gateways.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{BeaconError, Result};
use crate::hardware::{ControlConnection, ControlRadio, PushLink, PushTransport, ScanEvent, ScanSource};
use crate::types::{AdapterId, DeviceIdentity, GatewayAddress};
use crate::worker::{PushFile, PushStep};

fn push<T>(log: &Mutex<Vec<T>>, item: T) {
    log.lock().unwrap_or_else(PoisonError::into_inner).push(item);
}

fn snapshot<T: Clone>(log: &Mutex<Vec<T>>) -> Vec<T> {
    log.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

// =============================================================================
// SCAN
// =============================================================================

/// One scripted inquiry result.
pub type ScriptedEvent = Result<ScanEvent>;

/// Replays scripted inquiry sessions.
///
/// Each session ends with [`ScanEvent::SessionComplete`] once its script is
/// exhausted. Starting a session after the last script fails with
/// [`BeaconError::ScanSetupFailed`], which stops the scanner.
#[derive(Debug)]
pub struct MockScanSource {
    sessions: VecDeque<VecDeque<ScriptedEvent>>,
    current: VecDeque<ScriptedEvent>,
    idle_session: Option<Duration>,
    started: Arc<AtomicUsize>,
}

impl MockScanSource {
    /// Replay `sessions` in order.
    #[must_use]
    pub fn new(sessions: Vec<Vec<ScriptedEvent>>) -> Self {
        Self {
            sessions: sessions.into_iter().map(VecDeque::from).collect(),
            current: VecDeque::new(),
            idle_session: None,
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Produce empty sessions of `length` forever.
    #[must_use]
    pub fn idle(length: Duration) -> Self {
        Self {
            idle_session: Some(length),
            ..Self::new(Vec::new())
        }
    }

    /// Counter of sessions started so far.
    #[must_use]
    pub fn sessions_started(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.started)
    }
}

impl ScanSource for MockScanSource {
    async fn start_session(&mut self) -> Result<()> {
        if self.idle_session.is_none() {
            self.current = self
                .sessions
                .pop_front()
                .ok_or_else(|| BeaconError::ScanSetupFailed("no more scripted sessions".into()))?;
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<ScanEvent> {
        if let Some(length) = self.idle_session {
            tokio::time::sleep(length).await;
            return Ok(ScanEvent::SessionComplete);
        }
        self.current
            .pop_front()
            .unwrap_or(Ok(ScanEvent::SessionComplete))
    }
}

// =============================================================================
// PUSH
// =============================================================================

/// One recorded push step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCall {
    /// Which step ran.
    pub step: PushStep,
    /// Adapter the link was opened on.
    pub adapter: AdapterId,
    /// Target device, once known to the link.
    pub target: Option<DeviceIdentity>,
}

/// Push transport that records instead of transmitting.
#[derive(Debug, Clone, Default)]
pub struct MockPushTransport {
    calls: Arc<Mutex<Vec<PushCall>>>,
    failures: HashSet<PushStep>,
    gate: Option<Arc<Semaphore>>,
}

impl MockPushTransport {
    /// A transport on which every step succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose transfers wait for a permit on the returned gate.
    #[must_use]
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (transport, gate)
    }

    /// Make `step` fail on every link.
    #[must_use]
    pub fn fail_at(mut self, step: PushStep) -> Self {
        self.failures.insert(step);
        self
    }

    /// Every step recorded so far, across all links.
    #[must_use]
    pub fn calls(&self) -> Vec<PushCall> {
        snapshot(&self.calls)
    }
}

impl PushTransport for MockPushTransport {
    type Link = MockPushLink;

    async fn open(&self, adapter: AdapterId) -> Result<MockPushLink> {
        push(
            &self.calls,
            PushCall {
                step: PushStep::Open,
                adapter,
                target: None,
            },
        );
        if self.failures.contains(&PushStep::Open) {
            return Err(BeaconError::PushOpenFailed {
                adapter: adapter.to_string(),
                message: "scripted failure".into(),
            });
        }
        Ok(MockPushLink {
            adapter,
            target: None,
            calls: Arc::clone(&self.calls),
            failures: self.failures.clone(),
            gate: self.gate.clone(),
        })
    }
}

/// Link handed out by [`MockPushTransport`].
#[derive(Debug)]
pub struct MockPushLink {
    adapter: AdapterId,
    target: Option<DeviceIdentity>,
    calls: Arc<Mutex<Vec<PushCall>>>,
    failures: HashSet<PushStep>,
    gate: Option<Arc<Semaphore>>,
}

impl MockPushLink {
    fn record(&self, step: PushStep) -> Result<()> {
        push(
            &self.calls,
            PushCall {
                step,
                adapter: self.adapter,
                target: self.target.clone(),
            },
        );
        if !self.failures.contains(&step) {
            return Ok(());
        }
        let device = self
            .target
            .as_ref()
            .map_or_else(String::new, ToString::to_string);
        let message = "scripted failure".to_string();
        Err(match step {
            PushStep::Discover => BeaconError::PushChannelNotFound(device),
            PushStep::Connect => BeaconError::PushConnectFailed { device, message },
            PushStep::Disconnect => BeaconError::PushDisconnectFailed { device, message },
            _ => BeaconError::PushTransferFailed { device, message },
        })
    }
}

impl PushLink for MockPushLink {
    async fn discover_channel(&mut self, target: &DeviceIdentity) -> Result<u8> {
        self.target = Some(target.clone());
        self.record(PushStep::Discover)?;
        Ok(12)
    }

    async fn connect(&mut self, target: &DeviceIdentity, _channel: u8) -> Result<()> {
        self.target = Some(target.clone());
        self.record(PushStep::Connect)
    }

    async fn put_file(&mut self, _file: &PushFile) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| BeaconError::PushTransferFailed {
                    device: String::new(),
                    message: e.to_string(),
                })?
                .forget();
        }
        self.record(PushStep::Transfer)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.record(PushStep::Disconnect)
    }

    async fn close(self) {
        // Close never fails; a scripted failure here is only recorded.
        let _ = self.record(PushStep::Close);
    }
}

// =============================================================================
// CONTROL RADIO
// =============================================================================

/// Something the gateway link did on the control radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// A dedicated connection was opened.
    Connected(GatewayAddress),
    /// A payload was sent.
    Sent(GatewayAddress, Vec<u8>),
    /// A connection was dropped.
    Closed(GatewayAddress),
}

/// Control radio that records instead of transmitting.
#[derive(Debug, Clone, Default)]
pub struct MockControlRadio {
    events: Arc<Mutex<Vec<ControlEvent>>>,
    unreachable: HashSet<GatewayAddress>,
}

impl MockControlRadio {
    /// A radio that can reach every peer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make connections to `peer` fail.
    #[must_use]
    pub fn unreachable(mut self, peer: GatewayAddress) -> Self {
        self.unreachable.insert(peer);
        self
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<ControlEvent> {
        snapshot(&self.events)
    }
}

impl ControlRadio for MockControlRadio {
    type Connection = MockControlConnection;

    async fn connect(&mut self, peer: GatewayAddress) -> Result<MockControlConnection> {
        if self.unreachable.contains(&peer) {
            return Err(BeaconError::GatewayUnreachable {
                gateway: peer.to_string(),
                message: "scripted failure".into(),
            });
        }
        push(&self.events, ControlEvent::Connected(peer));
        Ok(MockControlConnection {
            peer,
            events: Arc::clone(&self.events),
        })
    }
}

/// Connection handed out by [`MockControlRadio`].
#[derive(Debug)]
pub struct MockControlConnection {
    peer: GatewayAddress,
    events: Arc<Mutex<Vec<ControlEvent>>>,
}

impl ControlConnection for MockControlConnection {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        push(&self.events, ControlEvent::Sent(self.peer, payload.to_vec()));
        Ok(())
    }
}

impl Drop for MockControlConnection {
    fn drop(&mut self) {
        push(&self.events, ControlEvent::Closed(self.peer));
    }
}
