//! Seams between the beacon logic and the radios.
//!
//! The scanner, the push workers and the gateway link only talk to hardware
//! through these traits. The BlueZ backend lives in
//! `bluetooth`; scripted stand-ins for tests live in `mock`.

use std::future::Future;

use crate::error::Result;
use crate::types::{AdapterId, DeviceIdentity, GatewayAddress};
use crate::worker::PushFile;

/// One report from the inquiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// The device that answered.
    pub address: DeviceIdentity,
    /// Signal strength in dBm, when the radio reported one.
    pub rssi: Option<i16>,
}

/// What the inquiry produced next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A device answered the inquiry.
    Detection(Detection),
    /// The current inquiry session ended.
    SessionComplete,
}

/// A restartable stream of inquiry results.
pub trait ScanSource: Send {
    /// Configure the scan adapter and start a new inquiry session.
    ///
    /// Failures here are fatal to the scanner.
    fn start_session(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next event of the current session.
    ///
    /// A [`BeaconError::ScanReadFailed`](crate::error::BeaconError::ScanReadFailed)
    /// is skipped by the scanner; any other error stops it.
    fn next_event(&mut self) -> impl Future<Output = Result<ScanEvent>> + Send;
}

/// Opens object push links on the push adapters.
pub trait PushTransport: Send + Sync + 'static {
    /// An open link on one adapter.
    type Link: PushLink;

    /// Open a link on `adapter`.
    fn open(&self, adapter: AdapterId) -> impl Future<Output = Result<Self::Link>> + Send;
}

/// One object push attempt, driven step by step by the push worker.
pub trait PushLink: Send + 'static {
    /// Find the RFCOMM channel of the target's object push service.
    fn discover_channel(
        &mut self,
        target: &DeviceIdentity,
    ) -> impl Future<Output = Result<u8>> + Send;

    /// Open the object exchange session.
    fn connect(
        &mut self,
        target: &DeviceIdentity,
        channel: u8,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Send the file.
    fn put_file(&mut self, file: &PushFile) -> impl Future<Output = Result<()>> + Send;

    /// End the object exchange session.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Release the adapter. Always called once the link was opened.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens connections to peers on the control radio.
pub trait ControlRadio: Send {
    /// A connection to one peer.
    type Connection: ControlConnection;

    /// Open a dedicated connection to `peer`.
    fn connect(
        &mut self,
        peer: GatewayAddress,
    ) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// A connection to the bound gateway. Dropping it closes it.
pub trait ControlConnection: Send {
    /// Send a payload to the peer.
    fn send(&mut self, payload: &[u8]) -> impl Future<Output = Result<()>> + Send;
}
