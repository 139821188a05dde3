//! Frame codec for the Tuya serial MCU protocol.
//!
//! Every message on the link is emitted as:
//!
//! ```text
//! ┌──────┬──────┬─────────┬─────────┬────────────┬─────────────┬──────────┐
//! │ 0x55 │ 0xAA │ VERSION │ COMMAND │ LENGTH(BE) │ PAYLOAD     │ CHECKSUM │
//! │ 1B   │ 1B   │ 1B      │ 1B      │ 2B         │ 0–65535B    │ 1B       │
//! └──────┴──────┴─────────┴─────────┴────────────┴─────────────┴──────────┘
//! ```
//!
//! The checksum is the low byte of the sum of every byte that precedes it,
//! header included. Frames sent by the host always carry version 0; the MCU
//! reports its protocol version in the version byte of its replies.
//!
//! [`FrameDecoder`] is an incremental decoder that can be fed arbitrary chunks
//! straight from the serial port. It resynchronizes on the two byte header,
//! drops frames whose checksum does not match and discards a partial frame once
//! the line has been idle for longer than its receive timeout.
use bytes::{Buf, BytesMut};
use log::{debug, trace};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Two byte magic sequence opening every frame
pub const HEADER: [u8; 2] = [0x55, 0xAA];

/// Bytes before the payload: header(2) + version + command + length(2)
pub const HEADER_LEN: usize = 6;

/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Version byte used on host-originated frames
pub const HOST_VERSION: u8 = 0x00;

/// Default inter-byte idle timeout after which a partial frame is dropped
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the 65535 byte frame limit")]
    PayloadTooLarge(usize),
    #[error("checksum mismatch on command 0x{command:02X} (calculated 0x{expected:02X}, received 0x{actual:02X})")]
    InvalidChecksum { command: u8, expected: u8, actual: u8 },
}

/// One checksum-validated unit of wire data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Host-originated frame (version 0)
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self::with_version(HOST_VERSION, command, payload)
    }

    pub fn with_version(version: u8, command: u8, payload: Vec<u8>) -> Self {
        Self {
            version,
            command,
            payload,
        }
    }

    /// Serialize using this frame's own version byte.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        encode_with_version(self.version, self.command, &self.payload)
    }
}

/// Low byte of the sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode a host command into its wire representation.
pub fn encode(command: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    encode_with_version(HOST_VERSION, command, payload)
}

fn encode_with_version(version: u8, command: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    out.extend_from_slice(&HEADER);
    out.push(version);
    out.push(command);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    out.push(checksum(&out));
    Ok(out)
}

/// Outcome of feeding one byte to the decoder
enum Scan {
    Pending,
    Complete(Frame),
    /// Bytes following the rejected header, to be scanned again
    Rejected(FrameError, BytesMut),
}

/// Incremental frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    idle_timeout: Duration,
    last_byte_at: Option<Instant>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl FrameDecoder {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            idle_timeout,
            last_byte_at: None,
        }
    }

    /// Push bytes received at `now`, returning every frame completed by them.
    ///
    /// Checksum failures are reported as `Err` entries in arrival order. The
    /// rejected frame's header is dropped and everything after it is scanned
    /// again, so a valid frame swallowed by a corrupted length is recovered.
    pub fn push(&mut self, data: &[u8], now: Instant) -> Vec<Result<Frame, FrameError>> {
        let mut out = Vec::new();
        if data.is_empty() {
            return out;
        }
        self.last_byte_at = Some(now);
        let mut input = BytesMut::from(data);
        while input.has_remaining() {
            match self.push_byte(input.get_u8()) {
                Scan::Pending => {}
                Scan::Complete(frame) => out.push(Ok(frame)),
                Scan::Rejected(err, mut rest) => {
                    out.push(Err(err));
                    rest.extend_from_slice(&input);
                    input = rest;
                }
            }
        }
        out
    }

    fn push_byte(&mut self, byte: u8) -> Scan {
        self.buf.extend_from_slice(&[byte]);
        match self.buf.len() {
            1 => {
                if byte != HEADER[0] {
                    self.buf.clear();
                }
                Scan::Pending
            }
            2 => {
                if byte != HEADER[1] {
                    self.buf.clear();
                    // The stray byte may itself open the next header.
                    if byte == HEADER[0] {
                        self.buf.extend_from_slice(&[byte]);
                    }
                }
                Scan::Pending
            }
            n if n < HEADER_LEN => Scan::Pending,
            n => {
                let len = usize::from(u16::from_be_bytes([self.buf[4], self.buf[5]]));
                if n < HEADER_LEN + len + 1 {
                    return Scan::Pending;
                }
                let mut raw = self.buf.split();
                let expected = checksum(&raw[..HEADER_LEN + len]);
                let actual = raw[HEADER_LEN + len];
                if expected != actual {
                    let err = FrameError::InvalidChecksum {
                        command: raw[3],
                        expected,
                        actual,
                    };
                    return Scan::Rejected(err, raw.split_off(HEADER.len()));
                }
                let frame = Frame {
                    version: raw[2],
                    command: raw[3],
                    payload: raw[HEADER_LEN..HEADER_LEN + len].to_vec(),
                };
                trace!(
                    "Decoded frame cmd=0x{:02X} ver={} len={}",
                    frame.command,
                    frame.version,
                    len
                );
                Scan::Complete(frame)
            }
        }
    }

    /// Drop a partial frame if no byte arrived within the idle timeout.
    ///
    /// Returns true when buffered bytes were discarded.
    pub fn expire(&mut self, now: Instant) -> bool {
        if self.buf.is_empty() {
            return false;
        }
        match self.last_byte_at {
            Some(last) if now.saturating_duration_since(last) > self.idle_timeout => {
                debug!(
                    "Receive timeout: dropping {} buffered bytes of an incomplete frame",
                    self.buf.len()
                );
                self.buf.clear();
                true
            }
            _ => false,
        }
    }

    /// True while a frame is partially received.
    pub fn is_receiving(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
