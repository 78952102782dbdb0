//! Automated knitting test: initializes the firmware, sweeps the carriage
//! across the bed and checks the selected needles after each pass.

use std::collections::VecDeque;
use std::fmt;

use log::{debug, info};

use crate::config::{CarriageFamily, Direction, MachineConfig, MachineFamily, TestConfig};
use crate::error::ProtocolFault;
use crate::machine::Machine;
use crate::protocol::{self, ApiCode, StateIndication};

/// Extra needles the selector must travel past the pattern range before a
/// garter carriage pass is checked.
pub const GARTER_CLEARANCE: i32 = 12;

/// Successful passes that complete a test: one in each direction.
pub const PASSES_TO_SUCCEED: u32 = 2;

/// Sweep reversals tolerated without a completed pass check.
pub const MAX_REVERSALS_WITHOUT_CHECK: u32 = 6;

/// Harness progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarnessState {
    /// Nothing sent yet.
    Init,
    /// Initialization requested; waiting for the firmware to report ready.
    AwaitingAck,
    /// Sweeping the carriage and serving line requests.
    Knitting,
}

impl HarnessState {
    /// Lower-case description used in fault messages.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Init => "initializing",
            Self::AwaitingAck => "awaiting acknowledgement",
            Self::Knitting => "knitting",
        }
    }
}

/// Knitted needles that differ from the expected pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMismatch {
    /// Pass number (0-based).
    pub row: u32,
    /// Direction of the failing pass.
    pub direction: Direction,
    /// First needle of the compared range.
    pub start_needle: u16,
    /// First mismatching needle.
    pub needle: u16,
    /// Expected needle characters for the range.
    pub expected: String,
    /// Knitted needle characters for the range.
    pub actual: String,
    /// Number of mismatching needles.
    pub mismatches: usize,
}

impl PatternMismatch {
    /// Renders `text` with every character that differs from `other` in
    /// reverse video.
    fn highlight(text: &str, other: &str) -> String {
        let mut out = String::with_capacity(text.len() * 2);
        for (ours, theirs) in text.chars().zip(other.chars()) {
            if ours == theirs {
                out.push(ours);
            } else {
                out.push_str("\x1b[7m");
                out.push(ours);
                out.push_str("\x1b[0m");
            }
        }
        out
    }
}

impl fmt::Display for PatternMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "row {} ({}) mismatch at needle {} ({} mismatching needle{})",
            self.row,
            self.direction,
            self.needle,
            self.mismatches,
            if self.mismatches == 1 { "" } else { "s" }
        )?;
        writeln!(
            f,
            "  expected [{}..]: {}",
            self.start_needle,
            Self::highlight(&self.expected, &self.actual)
        )?;
        write!(
            f,
            "  actual   [{}..]: {}",
            self.start_needle,
            Self::highlight(&self.actual, &self.expected)
        )
    }
}

/// Final outcome of a harness run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every pass matched.
    Passed {
        /// Number of passes checked.
        rows: u32,
    },
    /// A pass produced the wrong needles.
    Mismatch(PatternMismatch),
    /// The carriage kept sweeping without completing a pass.
    Stalled {
        /// Reversals performed since the last completed check.
        reversals: u32,
    },
}

impl Verdict {
    /// Returns `true` for [`Verdict::Passed`].
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed { rows } => write!(f, "PASS: {rows} rows knitted as expected"),
            Self::Mismatch(mismatch) => write!(f, "FAIL: {mismatch}"),
            Self::Stalled { reversals } => write!(
                f,
                "FAIL: no pass completed after {reversals} carriage reversals"
            ),
        }
    }
}

/// Scripted host driving the firmware through a two-pass knitting test.
#[derive(Debug, Clone)]
pub struct TestHarness {
    machine: MachineFamily,
    start: u16,
    stop: u16,
    clearance: i32,
    test: TestConfig,
    state: HarnessState,
    next_line: u8,
    pending_lines: VecDeque<(u32, u8)>,
    outgoing: Vec<Vec<u8>>,
    sweep: Direction,
    check_direction: Direction,
    line_delivered: bool,
    passes: u32,
    reversals_without_check: u32,
    verdict: Option<Verdict>,
}

impl TestHarness {
    /// Creates a harness for `config` using the pattern options in `test`.
    #[must_use]
    pub fn new(config: &MachineConfig, test: TestConfig) -> Self {
        let first = config.start_side().first_direction();
        Self {
            machine: config.machine(),
            start: config.start_needle(),
            stop: config.stop_needle(),
            clearance: if config.carriage() == CarriageFamily::Garter {
                GARTER_CLEARANCE
            } else {
                0
            },
            test,
            state: HarnessState::Init,
            next_line: 0,
            pending_lines: VecDeque::new(),
            outgoing: Vec::new(),
            sweep: first,
            check_direction: first,
            line_delivered: false,
            passes: 0,
            reversals_without_check: 0,
            verdict: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> HarnessState {
        self.state
    }

    /// Passes checked successfully so far.
    #[must_use]
    pub const fn passes(&self) -> u32 {
        self.passes
    }

    /// Outcome, once decided.
    #[must_use]
    pub const fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    /// Stamped messages waiting to be injected into the firmware.
    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outgoing)
    }

    /// Advances the script by one tick and returns the carriage move to
    /// perform, if any.
    pub fn on_tick(&mut self, machine: &Machine) -> Option<Direction> {
        if self.verdict.is_some() {
            return None;
        }
        match self.state {
            HarnessState::Init => {
                self.outgoing.push(protocol::req_init(self.machine));
                self.state = HarnessState::AwaitingAck;
                debug!("harness: reqInit sent for {}", self.machine);
                None
            }
            HarnessState::AwaitingAck => None,
            HarnessState::Knitting => {
                self.deliver_due_lines();
                if machine.at_rail(self.sweep) {
                    self.sweep = self.sweep.reversed();
                    self.reversals_without_check += 1;
                    debug!("harness: sweep reversed to {}", self.sweep);
                    if self.reversals_without_check > MAX_REVERSALS_WITHOUT_CHECK {
                        self.finish(Verdict::Stalled {
                            reversals: self.reversals_without_check,
                        });
                        return None;
                    }
                }
                Some(self.sweep)
            }
        }
    }

    fn deliver_due_lines(&mut self) {
        for (delay, _) in &mut self.pending_lines {
            *delay = delay.saturating_sub(1);
        }
        while let Some(&(0, line)) = self.pending_lines.front() {
            self.pending_lines.pop_front();
            let bitmap = protocol::bitmap(self.test.pattern(), self.start, self.stop);
            self.outgoing.push(protocol::cnf_line(line, 0, 0, &bitmap));
            self.line_delivered = true;
            debug!("harness: cnfLine {line} sent");
        }
    }

    /// Handles one decoded message sent by the firmware.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolFault`] when the message is malformed, reports an
    /// error, or cannot occur in the current state.
    pub fn on_frame(&mut self, frame: &[u8]) -> Result<(), ProtocolFault> {
        let (code, payload) = protocol::split_checksum(frame)?;
        let api = ApiCode::from_byte(code);
        match (self.state, api) {
            (_, Some(ApiCode::Debug | ApiCode::TestRes)) => Ok(()),
            (HarnessState::AwaitingAck, Some(ApiCode::CnfInit)) => {
                expect_ok(ApiCode::CnfInit, payload)
            }
            (HarnessState::AwaitingAck, Some(ApiCode::IndState)) => {
                let indication = StateIndication::parse(payload)?;
                expect_ok(ApiCode::IndState, &[indication.error])?;
                let start = byte_needle(self.start);
                let stop = byte_needle(self.stop);
                self.outgoing.push(protocol::req_start(start, stop, 0));
                self.state = HarnessState::Knitting;
                info!("harness: firmware ready, knitting needles {start}..={stop}");
                Ok(())
            }
            (HarnessState::Knitting, Some(ApiCode::IndState)) => {
                let indication = StateIndication::parse(payload)?;
                expect_ok(ApiCode::IndState, &[indication.error])
            }
            (HarnessState::Knitting, Some(ApiCode::CnfStart)) => {
                expect_ok(ApiCode::CnfStart, payload)
            }
            (HarnessState::Knitting, Some(ApiCode::ReqLine)) => {
                let &[line, ..] = payload else {
                    return Err(ProtocolFault::ShortPayload {
                        command: ApiCode::ReqLine.name(),
                        len: payload.len(),
                    });
                };
                if line != self.next_line {
                    return Err(ProtocolFault::UnexpectedLine {
                        requested: line,
                        expected: self.next_line,
                    });
                }
                self.next_line = self.next_line.wrapping_add(1);
                self.pending_lines
                    .push_back((self.test.line_delay_ticks(), line));
                Ok(())
            }
            _ => Err(ProtocolFault::UnexpectedCommand {
                command: protocol::code_name(code),
                code,
                state: self.state.describe(),
            }),
        }
    }

    /// Runs the pass check after a carriage move. Returns the verdict when
    /// the test ends.
    pub fn after_move(&mut self, machine: &Machine) -> Option<Verdict> {
        if self.verdict.is_some() || self.state != HarnessState::Knitting {
            return None;
        }
        if !self.line_delivered || machine.direction() != self.check_direction {
            return None;
        }
        let selected = machine.selected_needle();
        let past_boundary = match self.check_direction {
            Direction::Right => selected > i32::from(self.stop) + self.clearance,
            Direction::Left => selected < i32::from(self.start) - self.clearance,
        };
        if !past_boundary {
            return None;
        }

        let verdict = self.check_pass(machine.needles());
        self.line_delivered = false;
        self.check_direction = self.check_direction.reversed();
        self.reversals_without_check = 0;
        if let Some(verdict) = verdict {
            self.finish(verdict.clone());
            return Some(verdict);
        }
        None
    }

    fn check_pass(&mut self, needles: &[u8]) -> Option<Verdict> {
        let expected_pattern = self.test.expected().as_bytes();
        let range = usize::from(self.start)..=usize::from(self.stop);
        let actual = needles.get(range.clone()).unwrap_or_default();
        let expected: Vec<u8> = range
            .clone()
            .map(|needle| expected_pattern[(needle - range.start()) % expected_pattern.len()])
            .collect();

        let mut differing = actual
            .iter()
            .zip(&expected)
            .enumerate()
            .filter(|(_, (a, e))| a != e)
            .map(|(offset, _)| offset);
        if let Some(first) = differing.next() {
            let mismatches = 1 + differing.count();
            return Some(Verdict::Mismatch(PatternMismatch {
                row: self.passes,
                direction: self.check_direction,
                start_needle: self.start,
                needle: self.start + u16::try_from(first).unwrap_or(u16::MAX),
                expected: String::from_utf8_lossy(&expected).into_owned(),
                actual: String::from_utf8_lossy(actual).into_owned(),
                mismatches,
            }));
        }

        self.passes += 1;
        info!(
            "harness: pass {} ({}) matched",
            self.passes, self.check_direction
        );
        (self.passes >= PASSES_TO_SUCCEED).then_some(Verdict::Passed { rows: self.passes })
    }

    fn finish(&mut self, verdict: Verdict) {
        info!("harness: {verdict}");
        self.verdict = Some(verdict);
    }
}

fn expect_ok(command: ApiCode, payload: &[u8]) -> Result<(), ProtocolFault> {
    match payload.first() {
        Some(0) => Ok(()),
        Some(&status) => Err(ProtocolFault::ErrorStatus {
            command: command.name(),
            status,
        }),
        None => Err(ProtocolFault::ShortPayload {
            command: command.name(),
            len: 0,
        }),
    }
}

// Needle indices go on the wire as single bytes; every bed has < 256 needles.
fn byte_needle(needle: u16) -> u8 {
    u8::try_from(needle).unwrap_or(u8::MAX)
}
