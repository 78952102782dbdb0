//! Bounded human-readable histories for the status display.

use std::collections::VecDeque;
use std::fmt;

/// Number of characters kept by the protocol trace line.
pub const TRACE_LOG_CAPACITY: usize = 110;

/// Number of characters kept by the beeper history.
pub const BEEPER_HISTORY_CAPACITY: usize = 16;

/// Fixed-width character history; pushing drops the oldest character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History<const N: usize> {
    chars: VecDeque<u8>,
}

impl<const N: usize> Default for History<N> {
    fn default() -> Self {
        Self::filled(b' ')
    }
}

impl<const N: usize> History<N> {
    /// Creates a history with every slot set to `fill`.
    #[must_use]
    pub fn filled(fill: u8) -> Self {
        Self {
            chars: std::iter::repeat(fill).take(N).collect(),
        }
    }

    /// Appends one character, shifting the history left.
    pub fn push(&mut self, c: u8) {
        if self.chars.len() == N {
            self.chars.pop_front();
        }
        self.chars.push_back(c);
    }

    /// Appends every byte of `s`.
    pub fn push_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.push(byte);
        }
    }

    /// Most recently pushed character.
    #[must_use]
    pub fn last(&self) -> Option<u8> {
        self.chars.back().copied()
    }

    /// Returns the history as text, oldest character first.
    #[must_use]
    pub fn as_string(&self) -> String {
        self.chars.iter().map(|&b| char::from(b)).collect()
    }
}

impl<const N: usize> fmt::Display for History<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Which way a frame travelled on the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDirection {
    /// Host to device (bytes received by the firmware).
    ToDevice,
    /// Device to host (bytes sent by the firmware).
    FromDevice,
}

impl FrameDirection {
    /// Single-character prefix used in trace output.
    #[must_use]
    pub const fn prefix(self) -> char {
        match self {
            Self::ToDevice => '<',
            Self::FromDevice => '>',
        }
    }
}

/// Rolling log of decoded protocol frames, rendered for display only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceLog {
    history: History<TRACE_LOG_CAPACITY>,
}

impl TraceLog {
    /// Creates an empty (blank) trace log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders one decoded frame into the log.
    pub fn record(&mut self, direction: FrameDirection, frame: &[u8]) {
        self.history.push_str(&render_frame(direction, frame));
    }

    /// Current log contents, oldest first.
    #[must_use]
    pub fn contents(&self) -> String {
        self.history.as_string()
    }
}

/// Formats `frame` as `"<prefix> <bytes> "`, printable ASCII verbatim and
/// everything else as `\xx`.
#[must_use]
pub fn render_frame(direction: FrameDirection, frame: &[u8]) -> String {
    let mut out = String::with_capacity(frame.len() * 3 + 3);
    out.push(direction.prefix());
    out.push(' ');
    for &byte in frame {
        if byte.is_ascii_graphic() || byte == b' ' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("\\{byte:02x}"));
        }
    }
    out.push(' ');
    out
}
