//! Control link to the coordinating gateway.
//!
//! The gateway addresses the beacon with short packets whose first byte is
//! a command tag. The link starts unbound; a bind packet opens a dedicated
//! connection to its sender, and later binds replace that connection.

use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::Result;
use crate::hardware::{ControlConnection, ControlRadio};
use crate::types::GatewayAddress;

/// Reply to a health check.
pub const HEALTH_ACK: u8 = b'v';

/// Command tag for [`ControlCommand::Bind`].
pub const TAG_BIND: u8 = b'b';
/// Command tag for [`ControlCommand::HealthCheck`].
pub const TAG_HEALTH_CHECK: u8 = b'r';
/// Command tag for [`ControlCommand::Switch`].
pub const TAG_SWITCH: u8 = b's';

/// A packet received on the control radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    /// Who sent it.
    pub origin: GatewayAddress,
    /// Raw payload, command tag first.
    pub payload: Vec<u8>,
}

impl ControlPacket {
    /// Build a packet.
    pub fn new(origin: GatewayAddress, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            origin,
            payload: payload.into(),
        }
    }

    /// Decode the command, if the payload carries a known tag.
    #[must_use]
    pub fn command(&self) -> Option<ControlCommand> {
        let (&tag, rest) = self.payload.split_first()?;
        match tag {
            TAG_BIND => Some(ControlCommand::Bind),
            TAG_HEALTH_CHECK => Some(ControlCommand::HealthCheck),
            TAG_SWITCH => Some(ControlCommand::Switch(rest.to_vec())),
            _ => None,
        }
    }
}

/// Commands understood by the beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Make the sender the bound gateway.
    Bind,
    /// Ask for a one-byte acknowledgement.
    HealthCheck,
    /// Carries a message for the beacon. Not acted on yet.
    Switch(Vec<u8>),
}

/// Where the link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No gateway has bound yet, or the last bind failed.
    WaitingForBind,
    /// Bound to the given gateway.
    Bound(GatewayAddress),
}

enum Binding<C> {
    WaitingForBind,
    Bound { peer: GatewayAddress, connection: C },
}

/// The control link state machine. Owns the radio and the connection to
/// the bound gateway.
pub struct GatewayLink<R: ControlRadio> {
    radio: R,
    binding: Binding<R::Connection>,
}

impl<R: ControlRadio> GatewayLink<R> {
    /// Create an unbound link on `radio`.
    pub const fn new(radio: R) -> Self {
        Self {
            radio,
            binding: Binding::WaitingForBind,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        match &self.binding {
            Binding::WaitingForBind => LinkState::WaitingForBind,
            Binding::Bound { peer, .. } => LinkState::Bound(*peer),
        }
    }

    /// Handle one inbound packet.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting to a binding gateway or replying to a
    /// health check fails. The link stays usable either way.
    pub async fn handle_packet(&mut self, packet: ControlPacket) -> Result<()> {
        if packet.payload.is_empty() {
            debug!(origin = %packet.origin, "Ignoring empty control packet");
            return Ok(());
        }
        let Some(command) = packet.command() else {
            debug!(origin = %packet.origin, tag = packet.payload[0], "Ignoring unknown command");
            return Ok(());
        };

        match command {
            ControlCommand::Bind => self.bind(packet.origin).await,
            ControlCommand::HealthCheck => {
                let Binding::Bound { connection, .. } = &mut self.binding else {
                    warn!(origin = %packet.origin, "Health check before bind ignored");
                    return Ok(());
                };
                debug!(origin = %packet.origin, "Health check");
                connection.send(&[HEALTH_ACK]).await
            }
            ControlCommand::Switch(message) => {
                if matches!(self.binding, Binding::WaitingForBind) {
                    warn!(origin = %packet.origin, "Switch before bind ignored");
                } else {
                    info!(origin = %packet.origin, len = message.len(), "Switch message received");
                }
                Ok(())
            }
        }
    }

    async fn bind(&mut self, peer: GatewayAddress) -> Result<()> {
        // Drop the previous connection before opening the new one.
        if let Binding::Bound { peer: previous, .. } =
            std::mem::replace(&mut self.binding, Binding::WaitingForBind)
        {
            info!(%previous, %peer, "Rebinding gateway");
        }

        let connection = self.radio.connect(peer).await?;
        self.binding = Binding::Bound { peer, connection };
        info!(%peer, "Gateway bound");
        Ok(())
    }

    /// Consume packets until the channel closes.
    pub async fn run(mut self, mut packets: mpsc::Receiver<ControlPacket>) {
        async move {
            info!("Gateway link waiting for bind");
            while let Some(packet) = packets.recv().await {
                if let Err(e) = self.handle_packet(packet).await {
                    warn!(error = %e, code = e.error_code(), state = ?self.state(), "Control packet failed");
                }
            }
            info!("Control channel closed");
        }
        .instrument(info_span!("gateway"))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ControlEvent, MockControlRadio};

    const A: GatewayAddress = GatewayAddress([0, 0x13, 0xA2, 0, 0x40, 0, 0, 0x0A]);
    const B: GatewayAddress = GatewayAddress([0, 0x13, 0xA2, 0, 0x40, 0, 0, 0x0B]);

    #[test]
    fn test_command_decoding() {
        assert_eq!(ControlPacket::new(A, *b"b").command(), Some(ControlCommand::Bind));
        assert_eq!(ControlPacket::new(A, *b"r").command(), Some(ControlCommand::HealthCheck));
        assert_eq!(
            ControlPacket::new(A, *b"shello").command(),
            Some(ControlCommand::Switch(b"hello".to_vec()))
        );
        assert_eq!(ControlPacket::new(A, *b"x").command(), None);
        assert_eq!(ControlPacket::new(A, Vec::new()).command(), None);
    }

    #[tokio::test]
    async fn test_bind_then_rebind_replaces_connection() {
        let radio = MockControlRadio::new();
        let mut link = GatewayLink::new(radio.clone());
        assert_eq!(link.state(), LinkState::WaitingForBind);

        link.handle_packet(ControlPacket::new(A, *b"b")).await.unwrap();
        assert_eq!(link.state(), LinkState::Bound(A));

        link.handle_packet(ControlPacket::new(B, *b"b")).await.unwrap();
        assert_eq!(link.state(), LinkState::Bound(B));
        assert_eq!(
            radio.events(),
            vec![
                ControlEvent::Connected(A),
                ControlEvent::Closed(A),
                ControlEvent::Connected(B),
            ]
        );
    }

    #[tokio::test]
    async fn test_health_check_sends_single_ack() {
        let radio = MockControlRadio::new();
        let mut link = GatewayLink::new(radio.clone());
        link.handle_packet(ControlPacket::new(A, *b"b")).await.unwrap();

        link.handle_packet(ControlPacket::new(A, *b"r")).await.unwrap();

        assert_eq!(link.state(), LinkState::Bound(A));
        let sent: Vec<_> = radio
            .events()
            .into_iter()
            .filter(|e| matches!(e, ControlEvent::Sent(..)))
            .collect();
        assert_eq!(sent, vec![ControlEvent::Sent(A, vec![HEALTH_ACK])]);
    }

    #[tokio::test]
    async fn test_health_check_before_bind_is_ignored() {
        let radio = MockControlRadio::new();
        let mut link = GatewayLink::new(radio.clone());

        link.handle_packet(ControlPacket::new(A, *b"r")).await.unwrap();

        assert_eq!(link.state(), LinkState::WaitingForBind);
        assert!(radio.events().is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_switch_do_not_change_state() {
        let radio = MockControlRadio::new();
        let mut link = GatewayLink::new(radio.clone());
        link.handle_packet(ControlPacket::new(A, *b"b")).await.unwrap();

        link.handle_packet(ControlPacket::new(B, Vec::new())).await.unwrap();
        link.handle_packet(ControlPacket::new(B, *b"smsg")).await.unwrap();

        assert_eq!(link.state(), LinkState::Bound(A));
        assert_eq!(radio.events(), vec![ControlEvent::Connected(A)]);
    }

    #[tokio::test]
    async fn test_failed_rebind_returns_to_waiting() {
        let radio = MockControlRadio::new().unreachable(B);
        let mut link = GatewayLink::new(radio.clone());
        link.handle_packet(ControlPacket::new(A, *b"b")).await.unwrap();

        let err = link.handle_packet(ControlPacket::new(B, *b"b")).await.unwrap_err();

        assert_eq!(err.error_code(), "GATEWAY_UNREACHABLE");
        assert_eq!(link.state(), LinkState::WaitingForBind);
        assert_eq!(radio.events(), vec![ControlEvent::Connected(A), ControlEvent::Closed(A)]);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let radio = MockControlRadio::new();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(GatewayLink::new(radio.clone()).run(rx));

        tx.send(ControlPacket::new(A, *b"b")).await.unwrap();
        tx.send(ControlPacket::new(A, *b"r")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            radio.events(),
            vec![
                ControlEvent::Connected(A),
                ControlEvent::Sent(A, vec![HEALTH_ACK]),
                ControlEvent::Closed(A),
            ]
        );
    }
}
