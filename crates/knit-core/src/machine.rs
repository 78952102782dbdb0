//! Electromechanical model of the carriage, encoder, solenoids and needles.
//!
//! The model advances one encoder step per [`Machine::apply`] call. The
//! encoder phase counts quarter-needle steps through one revolution of the
//! selector cam (`4 × solenoid_count` steps); each solenoid's armature can
//! only follow its command while its cam is near the pushing position.

use std::fmt::Write as _;

use crate::carriage::{strategy, HallReadings, NeedleMapping};
use crate::config::{BeltPhase, Direction, MachineConfig, StartSide, MARGIN_NEEDLES};

/// Quadrature code for each quarter step: bit 0 drives V2, bit 1 drives V1.
pub const PHASE_MAP: [u8; 4] = [0, 1, 3, 2];

/// Belt phase signal lead over the encoder, in quarter steps.
pub const BELT_PHASE_ADVANCE: u32 = 8;

/// Cam distance within which an armature adopts its commanded state.
pub const ENGAGE_HALF_WIDTH: u32 = 2;

/// Cam distance within which an unpowered solenoid still releases its armature.
pub const DISENGAGE_HALF_WIDTH: u32 = 6;

/// Encoder and belt-phase line levels after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorOutputs {
    /// Encoder channel 1.
    pub v1: bool,
    /// Encoder channel 2.
    pub v2: bool,
    /// Belt phase sensor.
    pub belt_phase: bool,
}

impl SensorOutputs {
    /// Line levels for encoder `phase` on a selector with `solenoid_count`
    /// solenoids.
    #[must_use]
    pub const fn for_phase(phase: u32, solenoid_count: u32) -> Self {
        let code = PHASE_MAP[(phase % 4) as usize];
        Self {
            v1: code & 0b10 != 0,
            v2: code & 0b01 != 0,
            belt_phase: belt_phase_level(phase, solenoid_count),
        }
    }
}

/// Belt phase level for `phase`: low during the second half of the
/// revolution, shifted early by [`BELT_PHASE_ADVANCE`].
#[must_use]
pub const fn belt_phase_level(phase: u32, solenoid_count: u32) -> bool {
    (phase + BELT_PHASE_ADVANCE) % (4 * solenoid_count) <= 2 * solenoid_count
}

/// Starting carriage position for `config`.
///
/// The home position keeps encoder phase 0 aligned with solenoid 0; the
/// carriage is then moved towards the start side in whole solenoid cycles so
/// that alignment is preserved.
#[must_use]
pub fn initial_position(config: &MachineConfig) -> i32 {
    let n = i32::from(config.solenoid_count());
    let needles = i32::from(config.needle_count());
    let mut position = strategy(config.carriage()).home_position();
    if config.belt_phase() == BeltPhase::Shifted {
        position += n / 2;
    }
    match config.start_side() {
        StartSide::Left => {
            while position - n >= -MARGIN_NEEDLES {
                position -= n;
            }
        }
        StartSide::Right => {
            while position + n < needles + MARGIN_NEEDLES {
                position += n;
            }
        }
    }
    position
}

/// Carriage, encoder, solenoid and needle state for one bed.
#[derive(Debug, Clone)]
pub struct Machine {
    config: MachineConfig,
    mapping: &'static dyn NeedleMapping,
    position: i32,
    direction: Direction,
    phase: u32,
    selected: i32,
    hall: HallReadings,
    register: u16,
    solenoids: u16,
    previous_solenoids: u16,
    armature: u16,
    needles: Vec<u8>,
    dirty: bool,
}

impl Machine {
    /// Places the carriage at its starting position with all needles idle.
    #[must_use]
    pub fn new(config: &MachineConfig) -> Self {
        let mapping = strategy(config.carriage());
        let position = initial_position(config);
        let direction = config.start_side().first_direction();
        let mask = solenoid_mask(config.solenoid_count());
        Self {
            config: config.clone(),
            mapping,
            position,
            direction,
            phase: 0,
            selected: position + mapping.select_offset(direction),
            hall: HallReadings::default(),
            register: 0,
            solenoids: 0,
            previous_solenoids: 0,
            armature: mask,
            needles: vec![b'.'; usize::from(config.needle_count())],
            dirty: true,
        }
    }

    /// Configuration this machine was built from.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Latches the composite solenoid output register written by the
    /// firmware. Takes effect on the next [`Self::apply`].
    pub fn set_solenoid_register(&mut self, register: u16) {
        self.register = register;
    }

    /// Moves the carriage one encoder step and returns the new line levels.
    pub fn apply(&mut self, direction: Direction) -> SensorOutputs {
        self.step_encoder(direction);
        self.direction = direction;

        let machine = self.config.machine();
        let needle_count = i32::from(self.config.needle_count());
        self.hall = if self.config.hall_bands().covers(self.position) {
            self.mapping.hall_readings(self.position, needle_count, machine)
        } else {
            HallReadings::default()
        };

        self.previous_solenoids = self.solenoids;
        self.solenoids = machine.solenoid_bits(self.register);
        self.update_armature();

        self.selected = self.position + self.mapping.select_offset(direction);
        if let Some(slot) = usize::try_from(self.selected)
            .ok()
            .and_then(|index| self.needles.get_mut(index))
        {
            let bit = self.mapping.armature_index(
                self.selected,
                direction,
                self.config.belt_phase(),
                machine,
            );
            *slot = if self.armature & (1 << bit) != 0 {
                b'.'
            } else {
                b'|'
            };
        }

        self.dirty = true;
        self.outputs()
    }

    fn step_encoder(&mut self, direction: Direction) {
        let span = self.phase_span();
        match direction {
            Direction::Right => {
                let next = (self.phase + 1) % span;
                if next % 4 == 0 {
                    let limit = i32::from(self.config.needle_count()) + MARGIN_NEEDLES - 1;
                    if self.position < limit {
                        self.position += 1;
                    } else {
                        self.position = limit;
                        return;
                    }
                }
                self.phase = next;
            }
            Direction::Left => {
                let next = (self.phase + span - 1) % span;
                if next % 4 == 3 {
                    if self.position > -MARGIN_NEEDLES {
                        self.position -= 1;
                    } else {
                        self.position = -MARGIN_NEEDLES;
                        return;
                    }
                }
                self.phase = next;
            }
        }
    }

    fn update_armature(&mut self) {
        let n = u32::from(self.config.solenoid_count());
        let span = self.phase_span();
        for i in 0..n {
            let angle = (self.phase + (n - i) * 4) % span;
            let distance = angle.abs_diff(2 * n);
            let bit = 1u16 << i;
            let command = self.solenoids & bit;
            if distance <= ENGAGE_HALF_WIDTH {
                self.armature = (self.armature & !bit) | command;
            } else if distance <= DISENGAGE_HALF_WIDTH && command == 0 {
                self.armature &= !bit;
            }
        }
    }

    fn phase_span(&self) -> u32 {
        4 * u32::from(self.config.solenoid_count())
    }

    /// Encoder and belt-phase levels for the current phase.
    #[must_use]
    pub fn outputs(&self) -> SensorOutputs {
        SensorOutputs::for_phase(self.phase, u32::from(self.config.solenoid_count()))
    }

    /// Carriage position in needle space.
    #[must_use]
    pub const fn position(&self) -> i32 {
        self.position
    }

    /// Direction of the last move.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Needle under the active selector; may lie off the bed.
    #[must_use]
    pub const fn selected_needle(&self) -> i32 {
        self.selected
    }

    /// Encoder phase in `0..4 × solenoid_count`.
    #[must_use]
    pub const fn phase(&self) -> u32 {
        self.phase
    }

    /// Hall sensor readings at the current position.
    #[must_use]
    pub const fn hall(&self) -> HallReadings {
        self.hall
    }

    /// Raw solenoid output register.
    #[must_use]
    pub const fn solenoid_register(&self) -> u16 {
        self.register
    }

    /// Solenoid command bits sampled at the last step.
    #[must_use]
    pub const fn solenoids(&self) -> u16 {
        self.solenoids
    }

    /// Armature follower bits.
    #[must_use]
    pub const fn armature(&self) -> u16 {
        self.armature
    }

    /// Needle row: `'|'` selected, `'.'` idle.
    #[must_use]
    pub fn needles(&self) -> &[u8] {
        &self.needles
    }

    /// Returns `true` when the carriage cannot move further in `direction`.
    #[must_use]
    pub fn at_rail(&self, direction: Direction) -> bool {
        match direction {
            Direction::Left => self.position <= -MARGIN_NEEDLES,
            Direction::Right => {
                self.position >= i32::from(self.config.needle_count()) + MARGIN_NEEDLES - 1
            }
        }
    }

    /// Returns and clears the changed-since-last-display flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Status line: solenoid bits (changed bits in reverse video), phase,
    /// fractional position, belt phase and sensor values.
    #[must_use]
    pub fn render_status(&self) -> String {
        let mut out = String::from("S=[");
        for i in 0..self.config.solenoid_count() {
            let bit = 1u16 << i;
            if (self.solenoids ^ self.previous_solenoids) & bit != 0 {
                out.push_str("\x1b[7m");
            }
            out.push(if self.solenoids & bit != 0 { '.' } else { '|' });
            out.push_str("\x1b[0m");
        }
        let sub_step = f64::from(self.phase % 4) / 4.0;
        let _ = write!(
            out,
            "], Ph = {}, Pos = {:3.2}, BP = {}, Sensors = ({:4}, {:4})",
            self.phase,
            f64::from(self.position) + sub_step,
            u8::from(self.outputs().belt_phase),
            self.hall.left,
            self.hall.right,
        );
        out
    }

    /// Needle bed in two halves, each with a marker line showing the
    /// carriage (`^`) and the selector (`x`).
    #[must_use]
    pub fn render_bed(&self) -> String {
        let needle_count = usize::from(self.config.needle_count());
        let margin = usize::try_from(MARGIN_NEEDLES).unwrap_or_default();
        let width = needle_count + 2 * margin;

        let mut bed = vec![b' '; width];
        bed[margin..margin + needle_count].copy_from_slice(&self.needles);

        let mut markers = vec![b' '; width];
        for (value, mark) in [(self.selected, b'x'), (self.position, b'^')] {
            if let Some(slot) = usize::try_from(value + MARGIN_NEEDLES)
                .ok()
                .and_then(|index| markers.get_mut(index))
            {
                *slot = mark;
            }
        }

        let half = needle_count / 2 + margin;
        let text = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
        format!(
            "<- {}\n   {}\n-> {}\n   {}",
            text(&bed[..half]),
            text(&markers[..half]),
            text(&bed[half..]),
            text(&markers[half..]),
        )
    }
}

fn solenoid_mask(solenoid_count: u16) -> u16 {
    u16::try_from((1u32 << solenoid_count) - 1).unwrap_or(u16::MAX)
}
