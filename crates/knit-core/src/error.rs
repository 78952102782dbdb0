//! Error taxonomy for configuration and protocol-consistency failures.
//!
//! Frame truncation and dropped queue events are handled where they occur and
//! never surface here.

use thiserror::Error;

/// Startup configuration failures. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Machine family name not recognized.
    #[error("unknown machine family `{0}` (expected KH910, KH930 or KH270)")]
    UnknownMachine(String),
    /// Carriage family name not recognized.
    #[error("unknown carriage family `{0}` (expected K, L or G)")]
    UnknownCarriage(String),
    /// Belt phase name not recognized.
    #[error("unknown belt phase `{0}` (expected Regular or Shifted)")]
    UnknownBeltPhase(String),
    /// Start side name not recognized.
    #[error("unknown start side `{0}` (expected Left or Right)")]
    UnknownStartSide(String),
    /// Carriage family cannot run on the selected machine.
    #[error("carriage {carriage} is not supported on {machine}")]
    UnsupportedCarriage {
        /// Selected machine family.
        machine: &'static str,
        /// Requested carriage family.
        carriage: &'static str,
    },
    /// The right hall sensor cannot identify this carriage, so a run starting
    /// on the right would knit before the carriage is detected.
    #[error("carriage {carriage} cannot start on the Right on {machine}: the right hall sensor does not detect it")]
    UndetectableFromRight {
        /// Selected machine family.
        machine: &'static str,
        /// Requested carriage family.
        carriage: &'static str,
    },
    /// Start needle after stop needle.
    #[error("start needle {start} is after stop needle {stop}")]
    InvertedNeedleRange {
        /// Configured start needle.
        start: u16,
        /// Configured stop needle.
        stop: u16,
    },
    /// Needle outside the bed.
    #[error("needle {needle} is outside the bed (0..{needle_count})")]
    NeedleOutOfRange {
        /// Offending needle index.
        needle: u16,
        /// Number of needles on the bed.
        needle_count: u16,
    },
    /// Hall sensor bands overlap or are reversed.
    #[error("left hall band {left:?} must end before right hall band {right:?} begins")]
    OverlappingHallBands {
        /// Left sensor trigger band.
        left: (i32, i32),
        /// Right sensor trigger band.
        right: (i32, i32),
    },
    /// Test pattern is empty or contains characters other than `|` and `.`.
    #[error("invalid pattern `{0}`: use a non-empty string of '|' and '.'")]
    InvalidPattern(String),
}

/// Internal-consistency failure of the simulated firmware, detected by the
/// test harness while checking protocol responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolFault {
    /// Frame too short to carry a command code and checksum.
    #[error("truncated frame ({len} bytes)")]
    TruncatedFrame {
        /// Decoded frame length.
        len: usize,
    },
    /// Trailing checksum does not match the frame contents.
    #[error("checksum mismatch on {code:#04x}: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Command code of the frame.
        code: u8,
        /// Checksum computed over the frame.
        expected: u8,
        /// Checksum carried by the frame.
        actual: u8,
    },
    /// Response reported a non-zero status.
    #[error("{command} reported error status {status}")]
    ErrorStatus {
        /// Name of the responding command.
        command: &'static str,
        /// Reported status value.
        status: u8,
    },
    /// Frame arrived that the harness cannot accept in its current state.
    #[error("unexpected {command} ({code:#04x}) while {state}")]
    UnexpectedCommand {
        /// Name of the command code.
        command: &'static str,
        /// Raw command code.
        code: u8,
        /// Harness state at the time.
        state: &'static str,
    },
    /// Firmware requested a line other than the next one.
    #[error("line request for {requested}, expected {expected}")]
    UnexpectedLine {
        /// Line index requested by the firmware.
        requested: u8,
        /// Line index the harness expected.
        expected: u8,
    },
    /// Response payload shorter than its command requires.
    #[error("{command} payload too short ({len} bytes)")]
    ShortPayload {
        /// Name of the command.
        command: &'static str,
        /// Payload length received.
        len: usize,
    },
}
