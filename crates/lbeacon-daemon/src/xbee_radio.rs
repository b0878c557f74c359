//! XBee control radio on a serial port.
//!
//! A blocking reader thread turns the byte stream into control packets for
//! the gateway link. Outgoing payloads are written as Transmit Request
//! frames addressed to the bound gateway. The XBee is connectionless, so a
//! "connection" is just a handle that addresses one peer.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lbeacon_core::config::GatewayConfig;
use lbeacon_core::xbee::{encode_transmit_request, ApiFrame, FrameDecoder};
use lbeacon_core::{BeaconError, ControlConnection, ControlPacket, ControlRadio, GatewayAddress, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// How long a blocking read waits before checking for shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

type SharedPort<W> = Arc<Mutex<W>>;

/// Open the serial port described by `config`.
///
/// Returns the radio for the gateway link and a reader half to hand to
/// [`read_packets`].
///
/// # Errors
///
/// Returns [`BeaconError::ControlRadioFailed`] if the port cannot be opened.
pub fn open(config: &GatewayConfig) -> Result<(XbeeRadio<Box<dyn SerialPort>>, Box<dyn SerialPort>)> {
    let port = serialport::new(&config.serial_port, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| BeaconError::ControlRadioFailed(format!("{}: {e}", config.serial_port)))?;
    let reader = port
        .try_clone()
        .map_err(|e| BeaconError::ControlRadioFailed(format!("{}: {e}", config.serial_port)))?;

    info!(port = %config.serial_port, baud = config.baud_rate, "Opened control radio");
    Ok((XbeeRadio::new(port), reader))
}

/// Decode frames from `port` and forward received packets.
///
/// Blocks until the port reaches end of stream, fails, or the receiving
/// side of `packets` is dropped. Run it on a blocking thread.
pub fn read_packets<R: Read>(mut port: R, packets: &mpsc::Sender<ControlPacket>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];

    loop {
        if packets.is_closed() {
            debug!("Gateway link gone, stopping control radio reader");
            return;
        }
        let n = match port.read(&mut buf) {
            Ok(0) => {
                info!("Control radio reached end of stream");
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                continue;
            }
            Err(e) => {
                error!(error = %e, "Control radio read failed");
                return;
            }
        };

        decoder.extend(&buf[..n]);
        while let Some(frame) = decoder.next_frame() {
            match frame {
                Ok(ApiFrame::Receive(packet)) => {
                    trace!(origin = %packet.origin, len = packet.payload.len(), "Control packet");
                    if packets.blocking_send(packet).is_err() {
                        return;
                    }
                }
                Ok(ApiFrame::Other(frame_type)) => {
                    trace!(frame_type, "Skipping API frame");
                }
                Err(e) => {
                    let e = BeaconError::from(e);
                    warn!(error = %e, code = e.error_code(), "Dropping control frame");
                }
            }
        }
    }
}

/// XBee control radio writing to `W`.
pub struct XbeeRadio<W> {
    port: SharedPort<W>,
}

impl<W: Write + Send + 'static> XbeeRadio<W> {
    /// Wrap the write half of the radio.
    pub fn new(port: W) -> Self {
        Self {
            port: Arc::new(Mutex::new(port)),
        }
    }
}

impl<W: Write + Send + 'static> ControlRadio for XbeeRadio<W> {
    type Connection = XbeeConnection<W>;

    async fn connect(&mut self, peer: GatewayAddress) -> Result<XbeeConnection<W>> {
        debug!(%peer, "Addressing gateway");
        Ok(XbeeConnection {
            peer,
            port: Arc::clone(&self.port),
            frame_id: 0,
        })
    }
}

/// Handle addressing the bound gateway.
pub struct XbeeConnection<W> {
    peer: GatewayAddress,
    port: SharedPort<W>,
    frame_id: u8,
}

impl<W> XbeeConnection<W> {
    /// Frame ids cycle through 1..=255; 0 would suppress the transmit status.
    fn next_frame_id(&mut self) -> u8 {
        self.frame_id = self.frame_id.checked_add(1).unwrap_or(1);
        self.frame_id
    }
}

impl<W: Write + Send + 'static> ControlConnection for XbeeConnection<W> {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let frame = encode_transmit_request(self.next_frame_id(), self.peer, payload)?;
        let port = Arc::clone(&self.port);
        tokio::task::spawn_blocking(move || {
            let mut port = port.lock().unwrap_or_else(PoisonError::into_inner);
            port.write_all(&frame)?;
            port.flush()
        })
        .await
        .map_err(|e| BeaconError::ControlRadioFailed(e.to_string()))?
        .map_err(|e| BeaconError::ControlRadioFailed(e.to_string()))
    }
}
