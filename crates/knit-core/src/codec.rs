//! SLIP-style byte stuffing and the CRC-8 used to stamp protocol frames.
//!
//! Frames travel over the serial line as `END payload END`, where the payload
//! has every `END` and `ESC` byte replaced by a two-byte escape sequence:
//!
//! | raw byte | on the wire   |
//! |----------|---------------|
//! | `0xC0`   | `0xDB 0xDC`   |
//! | `0xDB`   | `0xDB 0xDD`   |

/// Frame delimiter byte.
pub const SLIP_END: u8 = 0xC0;
/// Escape introducer byte.
pub const SLIP_ESC: u8 = 0xDB;
/// Escaped form of [`SLIP_END`] (follows [`SLIP_ESC`]).
pub const SLIP_ESC_END: u8 = 0xDC;
/// Escaped form of [`SLIP_ESC`] (follows [`SLIP_ESC`]).
pub const SLIP_ESC_ESC: u8 = 0xDD;

/// Reflected CRC-8 polynomial (0x31 under the left-shifting convention).
pub const CRC8_POLY_REFLECTED: u8 = 0x8C;

/// Capacity of a frame accumulation buffer, in stuffed bytes.
pub const FRAME_CAPACITY: usize = 128;

/// Escapes `input` so that it contains no [`SLIP_END`] byte.
///
/// The result is never longer than twice the input.
#[must_use]
pub fn encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() * 2);
    for &byte in input {
        match byte {
            SLIP_END => out.extend_from_slice(&[SLIP_ESC, SLIP_ESC_END]),
            SLIP_ESC => out.extend_from_slice(&[SLIP_ESC, SLIP_ESC_ESC]),
            other => out.push(other),
        }
    }
    out
}

/// Escapes `input` and wraps it in delimiters, ready for transmission.
#[must_use]
pub fn encode_frame(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() * 2 + 2);
    out.push(SLIP_END);
    out.extend(encode(input));
    out.push(SLIP_END);
    out
}

/// Reverses [`encode`] into `dst`, returning the number of bytes written.
///
/// Decoding stops at the end of `dst` and at a trailing escape byte with
/// nothing after it. An escape followed by any other byte yields that byte.
pub fn decode_into(src: &[u8], dst: &mut [u8]) -> usize {
    let mut written = 0;
    let mut bytes = src.iter().copied();
    while written < dst.len() {
        let Some(byte) = bytes.next() else {
            break;
        };
        let decoded = if byte == SLIP_ESC {
            match bytes.next() {
                Some(SLIP_ESC_END) => SLIP_END,
                Some(SLIP_ESC_ESC) => SLIP_ESC,
                Some(other) => other,
                None => break,
            }
        } else {
            byte
        };
        dst[written] = decoded;
        written += 1;
    }
    written
}

/// Reverses [`encode`]; a dangling trailing escape is dropped.
#[must_use]
pub fn decode(src: &[u8]) -> Vec<u8> {
    let mut out = vec![0; src.len()];
    let len = decode_into(src, &mut out);
    out.truncate(len);
    out
}

/// CRC-8 (reflected polynomial `0x8C`, init 0, no final XOR) over `bytes`.
#[must_use]
pub fn checksum8(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in bytes {
        let mut extract = byte;
        for _ in 0..8 {
            let sum = (crc ^ extract) & 0x01;
            crc >>= 1;
            if sum != 0 {
                crc ^= CRC8_POLY_REFLECTED;
            }
            extract >>= 1;
        }
    }
    crc
}

/// Incremental frame accumulator fed one serial byte at a time.
///
/// Bytes beyond [`FRAME_CAPACITY`] are dropped until the next delimiter.
#[derive(Debug, Clone, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_CAPACITY),
        }
    }

    /// Number of stuffed bytes collected for the frame in progress.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true when no bytes are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Feeds one byte; returns the decoded frame when a delimiter closes a
    /// non-empty frame.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == SLIP_END {
            if self.buf.is_empty() {
                return None;
            }
            let frame = decode(&self.buf);
            self.buf.clear();
            return Some(frame);
        }
        if self.buf.len() < FRAME_CAPACITY {
            self.buf.push(byte);
        }
        None
    }

    /// Discards any partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
