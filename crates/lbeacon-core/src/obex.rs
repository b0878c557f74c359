//! Minimal OBEX Object Push client.
//!
//! Covers the subset of the exchange needed to hand a single file to a
//! phone: CONNECT, a chunked PUT and DISCONNECT. Works over any byte
//! stream, an RFCOMM socket in production.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// OBEX protocol version 1.0.
pub const OBEX_VERSION: u8 = 0x10;

/// Largest packet we offer to receive.
pub const MAX_PACKET_LENGTH: u16 = 0x2000;

/// Smallest packet size any OBEX peer must accept.
pub const MIN_PACKET_LENGTH: u16 = 255;

const OP_PUT: u8 = 0x02;
const OP_CONNECT: u8 = 0x80;
const OP_DISCONNECT: u8 = 0x81;
const OP_PUT_FINAL: u8 = 0x82;

const RSP_CONTINUE: u8 = 0x90;
const RSP_SUCCESS: u8 = 0xA0;

const HI_NAME: u8 = 0x01;
const HI_LENGTH: u8 = 0xC3;
const HI_BODY: u8 = 0x48;
const HI_END_OF_BODY: u8 = 0x49;
const HI_CONNECTION_ID: u8 = 0xCB;

/// Packet and byte-sequence header prefix: id plus u16 length.
const PREFIX_LEN: usize = 3;

/// Errors from the object exchange.
#[derive(Debug, thiserror::Error)]
pub enum ObexError {
    /// The underlying stream failed.
    #[error("OBEX I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer answered with a code other than the expected one.
    #[error("OBEX {operation} failed with response {code:#04x}")]
    UnexpectedResponse {
        /// Operation that was refused.
        operation: &'static str,
        /// Response code received.
        code: u8,
    },

    /// The peer sent something that is not an OBEX response.
    #[error("Malformed OBEX response: {0}")]
    MalformedResponse(String),

    /// The object does not fit in a Length header.
    #[error("Object too large for OBEX: {0} bytes")]
    ObjectTooLarge(usize),

    /// The negotiated packet size cannot carry the headers.
    #[error("OBEX packet length {0} too small")]
    PacketTooSmall(u16),
}

/// Result alias for the object exchange.
pub type ObexResult<T> = std::result::Result<T, ObexError>;

#[derive(Debug)]
struct Response {
    code: u8,
    body: Vec<u8>,
}

/// An OBEX client session over `S`.
#[derive(Debug)]
pub struct ObexClient<S> {
    stream: S,
    max_packet: u16,
    connection_id: Option<u32>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ObexClient<S> {
    /// Wrap a connected stream. No bytes are exchanged until [`connect`](Self::connect).
    pub const fn new(stream: S) -> Self {
        Self {
            stream,
            max_packet: MIN_PACKET_LENGTH,
            connection_id: None,
        }
    }

    /// Packet size agreed with the peer.
    #[must_use]
    pub const fn max_packet(&self) -> u16 {
        self.max_packet
    }

    /// Give back the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Open the OBEX session.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or when the peer does not answer Success.
    pub async fn connect(&mut self) -> ObexResult<()> {
        let mut body = vec![OBEX_VERSION, 0x00];
        body.extend_from_slice(&MAX_PACKET_LENGTH.to_be_bytes());
        let response = self.request(OP_CONNECT, &body).await?;
        expect(&response, "CONNECT", RSP_SUCCESS)?;

        if response.body.len() < 4 {
            return Err(ObexError::MalformedResponse(format!(
                "CONNECT response body is {} bytes",
                response.body.len()
            )));
        }
        let peer_max = u16::from_be_bytes([response.body[2], response.body[3]]);
        self.max_packet = peer_max.clamp(MIN_PACKET_LENGTH, MAX_PACKET_LENGTH);
        self.connection_id = find_connection_id(&response.body[4..]);
        debug!(
            version = response.body[0],
            max_packet = self.max_packet,
            connection_id = ?self.connection_id,
            "OBEX connected"
        );
        Ok(())
    }

    /// Send one object, split across as many PUT packets as needed.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, when the object is too large, or when the peer
    /// refuses any packet.
    pub async fn put(&mut self, name: &str, data: &[u8]) -> ObexResult<()> {
        let total = u32::try_from(data.len()).map_err(|_| ObexError::ObjectTooLarge(data.len()))?;
        let limit = usize::from(self.max_packet);

        let mut headers = Vec::new();
        self.push_connection_id(&mut headers);
        push_name(&mut headers, name);
        headers.push(HI_LENGTH);
        headers.extend_from_slice(&total.to_be_bytes());

        let mut offset = 0;
        let mut packets = 0usize;
        loop {
            let room = limit
                .checked_sub(PREFIX_LEN + headers.len() + PREFIX_LEN)
                .ok_or(ObexError::PacketTooSmall(self.max_packet))?;
            let end = data.len().min(offset + room);
            let last = end == data.len();
            if room == 0 && !last {
                return Err(ObexError::PacketTooSmall(self.max_packet));
            }

            let id = if last { HI_END_OF_BODY } else { HI_BODY };
            push_bytes(&mut headers, id, &data[offset..end]);
            let opcode = if last { OP_PUT_FINAL } else { OP_PUT };
            let response = self.request(opcode, &headers).await?;
            packets += 1;

            if last {
                expect(&response, "PUT", RSP_SUCCESS)?;
                debug!(name, bytes = data.len(), packets, "OBEX put complete");
                return Ok(());
            }
            expect(&response, "PUT", RSP_CONTINUE)?;
            offset = end;
            headers.clear();
            self.push_connection_id(&mut headers);
        }
    }

    /// Close the OBEX session.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or when the peer does not answer Success.
    pub async fn disconnect(&mut self) -> ObexResult<()> {
        let mut headers = Vec::new();
        self.push_connection_id(&mut headers);
        let response = self.request(OP_DISCONNECT, &headers).await?;
        expect(&response, "DISCONNECT", RSP_SUCCESS)?;
        self.connection_id = None;
        Ok(())
    }

    fn push_connection_id(&self, headers: &mut Vec<u8>) {
        if let Some(id) = self.connection_id {
            headers.push(HI_CONNECTION_ID);
            headers.extend_from_slice(&id.to_be_bytes());
        }
    }

    async fn request(&mut self, opcode: u8, body: &[u8]) -> ObexResult<Response> {
        let len = u16::try_from(PREFIX_LEN + body.len())
            .map_err(|_| ObexError::PacketTooSmall(self.max_packet))?;
        let mut packet = Vec::with_capacity(usize::from(len));
        packet.push(opcode);
        packet.extend_from_slice(&len.to_be_bytes());
        packet.extend_from_slice(body);
        self.stream.write_all(&packet).await?;
        self.stream.flush().await?;
        self.read_response().await
    }

    async fn read_response(&mut self) -> ObexResult<Response> {
        let mut prefix = [0u8; PREFIX_LEN];
        self.stream.read_exact(&mut prefix).await?;
        let len = usize::from(u16::from_be_bytes([prefix[1], prefix[2]]));
        if len < PREFIX_LEN {
            return Err(ObexError::MalformedResponse(format!("length {len} shorter than header")));
        }
        let mut body = vec![0u8; len - PREFIX_LEN];
        self.stream.read_exact(&mut body).await?;
        Ok(Response {
            code: prefix[0],
            body,
        })
    }
}

fn expect(response: &Response, operation: &'static str, code: u8) -> ObexResult<()> {
    if response.code == code {
        Ok(())
    } else {
        Err(ObexError::UnexpectedResponse {
            operation,
            code: response.code,
        })
    }
}

fn push_bytes(headers: &mut Vec<u8>, id: u8, value: &[u8]) {
    // Callers keep values below the packet limit, which is a u16.
    let len = u16::try_from(PREFIX_LEN + value.len()).unwrap_or(u16::MAX);
    headers.push(id);
    headers.extend_from_slice(&len.to_be_bytes());
    headers.extend_from_slice(value);
}

fn push_name(headers: &mut Vec<u8>, name: &str) {
    let mut encoded: Vec<u8> = name.encode_utf16().flat_map(u16::to_be_bytes).collect();
    encoded.extend_from_slice(&[0, 0]);
    push_bytes(headers, HI_NAME, &encoded);
}

/// Scan response headers for a Connection Id.
fn find_connection_id(mut headers: &[u8]) -> Option<u32> {
    while let Some(&id) = headers.first() {
        let size = match id >> 6 {
            // Unicode text and byte sequences carry a u16 length.
            0 | 1 => usize::from(u16::from_be_bytes([*headers.get(1)?, *headers.get(2)?])),
            2 => 2,
            _ => 5,
        };
        if size == 0 || size > headers.len() {
            return None;
        }
        if id == HI_CONNECTION_ID {
            return Some(u32::from_be_bytes(headers[1..5].try_into().ok()?));
        }
        headers = &headers[size..];
    }
    None
}
