//! Command codes and message layouts of the shield serial protocol.
//!
//! Every message is `[code, payload..., checksum8]` and travels SLIP-framed
//! (see [`crate::codec`]). Builders in this module return unframed, stamped
//! messages.

use crate::codec::checksum8;
use crate::config::MachineFamily;
use crate::error::ProtocolFault;

/// Protocol revision reported by `cnfInfo`.
pub const API_VERSION: u8 = 6;

/// Bytes in a line bitmap (one bit per needle, up to 200 needles).
pub const BITMAP_LEN: usize = 25;

/// `cnfLine` flag marking the final line of a pattern.
pub const FLAG_LAST_LINE: u8 = 0x01;

/// `indState` state value once the firmware is ready to knit.
pub const STATE_READY: u8 = 1;

/// Command code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ApiCode {
    /// Host asks to start knitting.
    ReqStart = 0x01,
    /// Firmware confirms start.
    CnfStart = 0xC1,
    /// Firmware asks for the next line.
    ReqLine = 0x82,
    /// Host delivers a line.
    CnfLine = 0x42,
    /// Host asks for version information.
    ReqInfo = 0x03,
    /// Firmware reports version information.
    CnfInfo = 0xC3,
    /// Host asks to enter hardware test mode.
    ReqTest = 0x04,
    /// Firmware confirms test mode.
    CnfTest = 0xC4,
    /// Firmware state indication.
    IndState = 0x84,
    /// Test mode: help.
    HelpCmd = 0x25,
    /// Test mode: send test pattern.
    SendCmd = 0x26,
    /// Test mode: beep.
    BeepCmd = 0x27,
    /// Test mode: set one solenoid.
    SetSingleCmd = 0x28,
    /// Test mode: set all solenoids.
    SetAllCmd = 0x29,
    /// Test mode: read end-of-line sensors.
    ReadEolSensorsCmd = 0x2A,
    /// Test mode: read encoders.
    ReadEncodersCmd = 0x2B,
    /// Test mode: continuous sensor read.
    AutoReadCmd = 0x2C,
    /// Test mode: continuous solenoid test.
    AutoTestCmd = 0x2D,
    /// Test mode: stop continuous operations.
    StopCmd = 0x2E,
    /// Test mode: leave test mode.
    QuitCmd = 0x2F,
    /// Host initializes the firmware for a machine.
    ReqInit = 0x05,
    /// Firmware confirms initialization.
    CnfInit = 0xC5,
    /// Test mode result text.
    TestRes = 0xEE,
    /// Free-form debug message.
    Debug = 0x9F,
}

const ALL_CODES: [ApiCode; 24] = [
    ApiCode::ReqStart,
    ApiCode::CnfStart,
    ApiCode::ReqLine,
    ApiCode::CnfLine,
    ApiCode::ReqInfo,
    ApiCode::CnfInfo,
    ApiCode::ReqTest,
    ApiCode::CnfTest,
    ApiCode::IndState,
    ApiCode::HelpCmd,
    ApiCode::SendCmd,
    ApiCode::BeepCmd,
    ApiCode::SetSingleCmd,
    ApiCode::SetAllCmd,
    ApiCode::ReadEolSensorsCmd,
    ApiCode::ReadEncodersCmd,
    ApiCode::AutoReadCmd,
    ApiCode::AutoTestCmd,
    ApiCode::StopCmd,
    ApiCode::QuitCmd,
    ApiCode::ReqInit,
    ApiCode::CnfInit,
    ApiCode::TestRes,
    ApiCode::Debug,
];

impl ApiCode {
    /// Looks up a code byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        ALL_CODES.into_iter().find(|code| code.byte() == byte)
    }

    /// Wire value.
    #[must_use]
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Protocol name of the command.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReqStart => "reqStart",
            Self::CnfStart => "cnfStart",
            Self::ReqLine => "reqLine",
            Self::CnfLine => "cnfLine",
            Self::ReqInfo => "reqInfo",
            Self::CnfInfo => "cnfInfo",
            Self::ReqTest => "reqTest",
            Self::CnfTest => "cnfTest",
            Self::IndState => "indState",
            Self::HelpCmd => "helpCmd",
            Self::SendCmd => "sendCmd",
            Self::BeepCmd => "beepCmd",
            Self::SetSingleCmd => "setSingleCmd",
            Self::SetAllCmd => "setAllCmd",
            Self::ReadEolSensorsCmd => "readEOLsensorsCmd",
            Self::ReadEncodersCmd => "readEncodersCmd",
            Self::AutoReadCmd => "autoReadCmd",
            Self::AutoTestCmd => "autoTestCmd",
            Self::StopCmd => "stopCmd",
            Self::QuitCmd => "quitCmd",
            Self::ReqInit => "reqInit",
            Self::CnfInit => "cnfInit",
            Self::TestRes => "testRes",
            Self::Debug => "debug",
        }
    }
}

/// Name of a raw code byte, `"unknown"` when not in the table.
#[must_use]
pub fn code_name(byte: u8) -> &'static str {
    ApiCode::from_byte(byte).map_or("unknown", ApiCode::name)
}

/// Appends the checksum of `body` to a copy of it.
#[must_use]
pub fn stamp(body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(body.len() + 1);
    msg.extend_from_slice(body);
    msg.push(checksum8(body));
    msg
}

/// Validates the trailing checksum and splits a message into its code and
/// payload (without the checksum).
///
/// # Errors
///
/// Returns [`ProtocolFault::TruncatedFrame`] for messages shorter than two
/// bytes and [`ProtocolFault::ChecksumMismatch`] for a bad checksum.
pub fn split_checksum(frame: &[u8]) -> Result<(u8, &[u8]), ProtocolFault> {
    let [code, rest @ ..] = frame else {
        return Err(ProtocolFault::TruncatedFrame { len: frame.len() });
    };
    let Some((&actual, payload)) = rest.split_last() else {
        return Err(ProtocolFault::TruncatedFrame { len: frame.len() });
    };
    let expected = checksum8(&frame[..frame.len() - 1]);
    if expected != actual {
        return Err(ProtocolFault::ChecksumMismatch {
            code: *code,
            expected,
            actual,
        });
    }
    Ok((*code, payload))
}

/// `reqInit [0x05, machine]`.
#[must_use]
pub fn req_init(machine: MachineFamily) -> Vec<u8> {
    stamp(&[ApiCode::ReqInit.byte(), machine.wire_code()])
}

/// `cnfInit [0xC5, error]`.
#[must_use]
pub fn cnf_init(error: u8) -> Vec<u8> {
    stamp(&[ApiCode::CnfInit.byte(), error])
}

/// `reqStart [0x01, start, stop, flags]`.
#[must_use]
pub fn req_start(start: u8, stop: u8, flags: u8) -> Vec<u8> {
    stamp(&[ApiCode::ReqStart.byte(), start, stop, flags])
}

/// `cnfStart [0xC1, error]`.
#[must_use]
pub fn cnf_start(error: u8) -> Vec<u8> {
    stamp(&[ApiCode::CnfStart.byte(), error])
}

/// `reqLine [0x82, line]`.
#[must_use]
pub fn req_line(line: u8) -> Vec<u8> {
    stamp(&[ApiCode::ReqLine.byte(), line])
}

/// `cnfLine [0x42, line, color, flags, bitmap...]`.
#[must_use]
pub fn cnf_line(line: u8, color: u8, flags: u8, bitmap: &[u8; BITMAP_LEN]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + BITMAP_LEN);
    body.extend_from_slice(&[ApiCode::CnfLine.byte(), line, color, flags]);
    body.extend_from_slice(bitmap);
    stamp(&body)
}

/// `reqInfo [0x03]`.
#[must_use]
pub fn req_info() -> Vec<u8> {
    stamp(&[ApiCode::ReqInfo.byte()])
}

/// `cnfInfo [0xC3, api, major, minor, patch]`.
#[must_use]
pub fn cnf_info(major: u8, minor: u8, patch: u8) -> Vec<u8> {
    stamp(&[ApiCode::CnfInfo.byte(), API_VERSION, major, minor, patch])
}

/// `reqTest [0x04]`.
#[must_use]
pub fn req_test() -> Vec<u8> {
    stamp(&[ApiCode::ReqTest.byte()])
}

/// `cnfTest [0xC4, error]`.
#[must_use]
pub fn cnf_test(error: u8) -> Vec<u8> {
    stamp(&[ApiCode::CnfTest.byte(), error])
}

/// Decoded `indState` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateIndication {
    /// Error status; 0 when healthy.
    pub error: u8,
    /// Firmware state ([`STATE_READY`] once initialized).
    pub state: u8,
    /// Left hall sensor reading.
    pub hall_left: u16,
    /// Right hall sensor reading.
    pub hall_right: u16,
    /// Detected carriage code.
    pub carriage: u8,
    /// Carriage position, saturated to a byte.
    pub position: u8,
    /// Direction code.
    pub direction: u8,
}

impl StateIndication {
    /// Payload length in bytes.
    pub const PAYLOAD_LEN: usize = 9;

    /// Builds the stamped `indState` message.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let [left_hi, left_lo] = self.hall_left.to_be_bytes();
        let [right_hi, right_lo] = self.hall_right.to_be_bytes();
        stamp(&[
            ApiCode::IndState.byte(),
            self.error,
            self.state,
            left_hi,
            left_lo,
            right_hi,
            right_lo,
            self.carriage,
            self.position,
            self.direction,
        ])
    }

    /// Parses a payload returned by [`split_checksum`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolFault::ShortPayload`] when fewer than
    /// [`Self::PAYLOAD_LEN`] bytes are present.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolFault> {
        let &[
            error,
            state,
            left_hi,
            left_lo,
            right_hi,
            right_lo,
            carriage,
            position,
            direction,
            ..,
        ] = payload
        else {
            return Err(ProtocolFault::ShortPayload {
                command: ApiCode::IndState.name(),
                len: payload.len(),
            });
        };
        Ok(Self {
            error,
            state,
            hall_left: u16::from_be_bytes([left_hi, left_lo]),
            hall_right: u16::from_be_bytes([right_hi, right_lo]),
            carriage,
            position,
            direction,
        })
    }
}

/// Builds a line bitmap: needle `k` in `start..=stop` is selected when the
/// pattern character at `(k - start) % len` is `'|'`.
#[must_use]
pub fn bitmap(pattern: &str, start: u16, stop: u16) -> [u8; BITMAP_LEN] {
    let mut bits = [0u8; BITMAP_LEN];
    let pattern = pattern.as_bytes();
    if pattern.is_empty() {
        return bits;
    }
    for needle in start..=stop {
        let offset = usize::from(needle - start);
        if pattern[offset % pattern.len()] == b'|' {
            let index = usize::from(needle);
            if let Some(byte) = bits.get_mut(index / 8) {
                *byte |= 1 << (index % 8);
            }
        }
    }
    bits
}

/// Returns `true` when `needle` is selected in `bitmap`.
#[must_use]
pub fn bitmap_bit(bitmap: &[u8], needle: usize) -> bool {
    bitmap
        .get(needle / 8)
        .is_some_and(|byte| byte & (1 << (needle % 8)) != 0)
}

/// One-line human-readable classification of a stamped message.
#[must_use]
pub fn describe(frame: &[u8]) -> String {
    let (code, payload) = match split_checksum(frame) {
        Ok(parts) => parts,
        Err(fault) => return format!("invalid frame: {fault}"),
    };
    let Some(api) = ApiCode::from_byte(code) else {
        return format!("unknown command {code:#04x}");
    };
    match (api, payload) {
        (ApiCode::ReqInit, &[machine, ..]) => match MachineFamily::from_wire_code(machine) {
            Some(family) => format!("reqInit {family}"),
            None => format!("reqInit machine={machine}"),
        },
        (ApiCode::ReqStart, &[start, stop, flags, ..]) => {
            format!("reqStart {start}..={stop} flags={flags:#04x}")
        }
        (ApiCode::ReqLine, &[line, ..]) => format!("reqLine {line}"),
        (ApiCode::CnfLine, &[line, color, flags, ref bits @ ..]) => {
            let selected = (0..bits.len() * 8).filter(|&k| bitmap_bit(bits, k)).count();
            let last = if flags & FLAG_LAST_LINE != 0 { " last" } else { "" };
            format!("cnfLine {line} color={color} selected={selected}{last}")
        }
        (ApiCode::CnfInfo, &[api_version, major, minor, patch, ..]) => {
            format!("cnfInfo api={api_version} v{major}.{minor}.{patch}")
        }
        (ApiCode::IndState, _) => match StateIndication::parse(payload) {
            Ok(ind) => format!(
                "indState error={} state={} hall=({}, {}) carriage={} position={} direction={}",
                ind.error,
                ind.state,
                ind.hall_left,
                ind.hall_right,
                ind.carriage,
                ind.position,
                ind.direction
            ),
            Err(fault) => format!("indState {fault}"),
        },
        (
            ApiCode::CnfInit | ApiCode::CnfStart | ApiCode::CnfTest,
            &[error, ..],
        ) => format!("{} error={error}", api.name()),
        _ => api.name().to_string(),
    }
}
