//! XBee API-mode frame codec for the control radio.
//!
//! Frames are `0x7E`, a big-endian u16 length, the frame data and a
//! checksum byte. Only the two frame types the control link needs are
//! understood: Transmit Request going out and Receive Packet coming in.

use crate::gateway::ControlPacket;
use crate::types::GatewayAddress;

/// Start of every API frame.
pub const START_DELIMITER: u8 = 0x7E;
/// Outbound data to a 64-bit address.
pub const FRAME_TRANSMIT_REQUEST: u8 = 0x10;
/// Inbound data from a 64-bit address.
pub const FRAME_RECEIVE_PACKET: u8 = 0x90;

/// Frame data is capped well above the radio's largest RF payload.
pub const MAX_FRAME_DATA: usize = 0x0200;

/// 16-bit address meaning "unknown, use the 64-bit one".
const UNKNOWN_NETWORK_ADDRESS: [u8; 2] = [0xFF, 0xFE];

/// Frame type, 64-bit source, 16-bit source and options.
const RECEIVE_HEADER_LEN: usize = 12;

/// Errors from decoding or encoding API frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The checksum byte did not match the frame data.
    #[error("bad frame checksum: expected {expected:#04x}, got {actual:#04x}")]
    BadChecksum {
        /// Checksum computed over the frame data.
        expected: u8,
        /// Checksum byte on the wire.
        actual: u8,
    },

    /// The announced length exceeds what the radio can send.
    #[error("frame data of {0} bytes is too long")]
    TooLong(usize),

    /// A frame is shorter than its type requires.
    #[error("frame type {frame_type:#04x} truncated at {len} bytes")]
    Truncated {
        /// Frame type byte.
        frame_type: u8,
        /// Frame data length received.
        len: usize,
    },
}

/// A decoded API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    /// Data from a peer.
    Receive(ControlPacket),
    /// Any frame type the control link does not use (status, AT responses).
    Other(u8),
}

/// `0xFF` minus the low byte of the sum of the frame data.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    0xFF - data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Wrap frame data in delimiter, length and checksum.
///
/// # Errors
///
/// Returns [`FrameError::TooLong`] if the data exceeds [`MAX_FRAME_DATA`].
pub fn encode_frame(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    if data.len() > MAX_FRAME_DATA {
        return Err(FrameError::TooLong(data.len()));
    }
    let len = u16::try_from(data.len()).map_err(|_| FrameError::TooLong(data.len()))?;
    let mut frame = Vec::with_capacity(data.len() + 4);
    frame.push(START_DELIMITER);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(data);
    frame.push(checksum(data));
    Ok(frame)
}

/// Encode a Transmit Request carrying `payload` to `destination`.
///
/// # Errors
///
/// Returns [`FrameError::TooLong`] if the payload does not fit a frame.
pub fn encode_transmit_request(
    frame_id: u8,
    destination: GatewayAddress,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    let mut data = Vec::with_capacity(14 + payload.len());
    data.push(FRAME_TRANSMIT_REQUEST);
    data.push(frame_id);
    data.extend_from_slice(&destination.0);
    data.extend_from_slice(&UNKNOWN_NETWORK_ADDRESS);
    // Broadcast radius, then transmit options.
    data.push(0);
    data.push(0);
    data.extend_from_slice(payload);
    encode_frame(&data)
}

/// Interpret checksummed frame data.
///
/// # Errors
///
/// Returns [`FrameError::Truncated`] for a Receive Packet too short to carry
/// its addresses.
pub fn parse_frame_data(data: &[u8]) -> Result<ApiFrame, FrameError> {
    match data.first() {
        Some(&FRAME_RECEIVE_PACKET) => {
            if data.len() < RECEIVE_HEADER_LEN {
                return Err(FrameError::Truncated {
                    frame_type: FRAME_RECEIVE_PACKET,
                    len: data.len(),
                });
            }
            let mut origin = [0u8; 8];
            origin.copy_from_slice(&data[1..9]);
            Ok(ApiFrame::Receive(ControlPacket::new(
                GatewayAddress(origin),
                &data[RECEIVE_HEADER_LEN..],
            )))
        }
        Some(&other) => Ok(ApiFrame::Other(other)),
        None => Err(FrameError::Truncated { frame_type: 0, len: 0 }),
    }
}

/// Reassembles API frames from an arbitrary byte stream.
///
/// Bytes before a start delimiter are discarded. After a bad frame the
/// decoder skips that delimiter and resynchronises on the next one.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// An empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the radio.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes held waiting for the rest of a frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Result<ApiFrame, FrameError>> {
        loop {
            let start = self.buffer.iter().position(|&b| b == START_DELIMITER);
            match start {
                Some(0) => {}
                Some(n) => {
                    self.buffer.drain(..n);
                }
                None => {
                    self.buffer.clear();
                    return None;
                }
            }
            if self.buffer.len() < 3 {
                return None;
            }

            let len = usize::from(u16::from_be_bytes([self.buffer[1], self.buffer[2]]));
            if len > MAX_FRAME_DATA {
                self.buffer.drain(..1);
                return Some(Err(FrameError::TooLong(len)));
            }
            if len == 0 {
                self.buffer.drain(..1);
                continue;
            }
            if self.buffer.len() < len + 4 {
                return None;
            }

            let expected = checksum(&self.buffer[3..3 + len]);
            let actual = self.buffer[3 + len];
            if expected != actual {
                self.buffer.drain(..1);
                return Some(Err(FrameError::BadChecksum { expected, actual }));
            }
            let frame: Vec<u8> = self.buffer.drain(..len + 4).collect();
            return Some(parse_frame_data(&frame[3..3 + len]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY: GatewayAddress = GatewayAddress([0x00, 0x13, 0xA2, 0x00, 0x40, 0x00, 0x00, 0x0A]);

    fn bind_frame() -> Vec<u8> {
        vec![
            0x7E, 0x00, 0x0D, 0x90, 0x00, 0x13, 0xA2, 0x00, 0x40, 0x00, 0x00, 0x0A, 0xFF, 0xFE,
            0x01, b'b', 0x10,
        ]
    }

    #[test]
    fn test_transmit_request_matches_reference_frame() {
        let dest = GatewayAddress([0x00, 0x13, 0xA2, 0x00, 0x40, 0x0A, 0x01, 0x27]);
        let frame = encode_transmit_request(0x01, dest, b"TxData0A").unwrap();

        let mut expected = vec![
            0x7E, 0x00, 0x16, 0x10, 0x01, 0x00, 0x13, 0xA2, 0x00, 0x40, 0x0A, 0x01, 0x27, 0xFF,
            0xFE, 0x00, 0x00,
        ];
        expected.extend_from_slice(b"TxData0A");
        expected.push(0x13);
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_decode_receive_packet() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bind_frame());

        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame, ApiFrame::Receive(ControlPacket::new(GATEWAY, *b"b")));
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_across_partial_reads() {
        let mut decoder = FrameDecoder::new();
        let frame = bind_frame();
        decoder.extend(&frame[..5]);
        assert!(decoder.next_frame().is_none());
        decoder.extend(&frame[5..]);
        assert!(matches!(decoder.next_frame(), Some(Ok(ApiFrame::Receive(_)))));
    }

    #[test]
    fn test_garbage_and_bad_checksum_resync() {
        let mut decoder = FrameDecoder::new();
        let mut corrupt = bind_frame();
        *corrupt.last_mut().unwrap() ^= 0xFF;

        decoder.extend(&[0x00, 0x42]);
        decoder.extend(&corrupt);
        decoder.extend(&bind_frame());

        assert!(matches!(
            decoder.next_frame(),
            Some(Err(FrameError::BadChecksum { expected: 0x10, .. }))
        ));
        assert!(matches!(decoder.next_frame(), Some(Ok(ApiFrame::Receive(_)))));
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_other_frame_types_are_reported() {
        // Transmit Status
        let frame = encode_frame(&[0x8B, 0x01, 0xFF, 0xFE, 0x00, 0x00, 0x00]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);
        assert_eq!(decoder.next_frame(), Some(Ok(ApiFrame::Other(0x8B))));
    }

    #[test]
    fn test_short_receive_packet_is_truncated() {
        assert_eq!(
            parse_frame_data(&[0x90, 0x00, 0x13]),
            Err(FrameError::Truncated {
                frame_type: 0x90,
                len: 3
            })
        );
    }

    #[test]
    fn test_empty_payload_receive_packet() {
        let mut data = vec![0x90];
        data.extend_from_slice(&GATEWAY.0);
        data.extend_from_slice(&[0xFF, 0xFE, 0x01]);
        assert_eq!(
            parse_frame_data(&data),
            Ok(ApiFrame::Receive(ControlPacket::new(GATEWAY, Vec::new())))
        );
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let payload = vec![0u8; MAX_FRAME_DATA];
        assert!(matches!(
            encode_transmit_request(1, GATEWAY, &payload),
            Err(FrameError::TooLong(_))
        ));
    }
}
