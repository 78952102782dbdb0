//! Per-run machine configuration and harness options.

use std::fmt;
use std::str::FromStr;

use crate::carriage::strategy;
use crate::error::ConfigError;

/// Number of needles the carriage may travel beyond either end of the bed.
pub const MARGIN_NEEDLES: i32 = 28;

/// Default delay, in ticks, before the harness answers a line request.
pub const DEFAULT_LINE_DELAY_TICKS: u32 = 10;

/// Default test pattern: alternating selected and idle needles.
pub const DEFAULT_TEST_PATTERN: &str = "|.";

/// Knitting machine model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MachineFamily {
    /// Brother KH-910: 200 needles, 16 solenoids.
    #[default]
    Kh910,
    /// Brother KH-930: 200 needles, 16 solenoids.
    Kh930,
    /// Brother KH-270: 112 needles, 12 solenoids on register bits 3..=14.
    Kh270,
}

impl MachineFamily {
    /// Number of needles on the bed.
    #[must_use]
    pub const fn needle_count(self) -> u16 {
        match self {
            Self::Kh910 | Self::Kh930 => 200,
            Self::Kh270 => 112,
        }
    }

    /// Number of solenoids in the carriage selector.
    #[must_use]
    pub const fn solenoid_count(self) -> u16 {
        match self {
            Self::Kh910 | Self::Kh930 => 16,
            Self::Kh270 => 12,
        }
    }

    /// Machine identifier carried by the initialization request.
    #[must_use]
    pub const fn wire_code(self) -> u8 {
        match self {
            Self::Kh910 => 0,
            Self::Kh930 => 1,
            Self::Kh270 => 2,
        }
    }

    /// Inverse of [`Self::wire_code`].
    #[must_use]
    pub const fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Kh910),
            1 => Some(Self::Kh930),
            2 => Some(Self::Kh270),
            _ => None,
        }
    }

    /// Extracts the solenoid command bits from the composite 16-bit register.
    #[must_use]
    pub const fn solenoid_bits(self, register: u16) -> u16 {
        match self {
            Self::Kh910 | Self::Kh930 => register,
            Self::Kh270 => (register >> 3) & 0x0FFF,
        }
    }

    /// Register bit driving solenoid `index`.
    #[must_use]
    pub const fn register_bit(self, index: u16) -> u16 {
        match self {
            Self::Kh910 | Self::Kh930 => index,
            Self::Kh270 => index + 3,
        }
    }

    /// Canonical name as accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Kh910 => "KH910",
            Self::Kh930 => "KH930",
            Self::Kh270 => "KH270",
        }
    }
}

impl fmt::Display for MachineFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MachineFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "KH910" => Ok(Self::Kh910),
            "KH930" => Ok(Self::Kh930),
            "KH270" => Ok(Self::Kh270),
            _ => Err(ConfigError::UnknownMachine(s.to_string())),
        }
    }
}

/// Carriage model, each with its own sensor magnets and selector geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CarriageFamily {
    /// Knit carriage (north magnet).
    #[default]
    Knit,
    /// Lace carriage (south magnet).
    Lace,
    /// Garter carriage (south and north magnets).
    Garter,
    /// KH-270 knit carriage (two north magnets).
    Knit270,
}

impl CarriageFamily {
    /// Carriage identifier reported in state indications.
    #[must_use]
    pub const fn wire_code(self) -> u8 {
        match self {
            Self::Knit => 0,
            Self::Lace => 1,
            Self::Garter => 2,
            Self::Knit270 => 3,
        }
    }

    /// Short name used on the command line and in status output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Knit => "K",
            Self::Lace => "L",
            Self::Garter => "G",
            Self::Knit270 => "K270",
        }
    }
}

impl fmt::Display for CarriageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CarriageFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "K" | "KNIT" => Ok(Self::Knit),
            "L" | "LACE" => Ok(Self::Lace),
            "G" | "GARTER" => Ok(Self::Garter),
            "K270" | "KNIT270" => Ok(Self::Knit270),
            _ => Err(ConfigError::UnknownCarriage(s.to_string())),
        }
    }
}

/// Belt-to-carriage alignment, which decides the solenoid-to-needle mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BeltPhase {
    /// Belt aligned with solenoid 0 over needle 0.
    #[default]
    Regular,
    /// Belt offset by half a solenoid cycle.
    Shifted,
}

impl fmt::Display for BeltPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Regular => "Regular",
            Self::Shifted => "Shifted",
        })
    }
}

impl FromStr for BeltPhase {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "regular" => Ok(Self::Regular),
            "shifted" => Ok(Self::Shifted),
            _ => Err(ConfigError::UnknownBeltPhase(s.to_string())),
        }
    }
}

/// Direction of carriage travel along the bed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Direction {
    /// Towards needle 0.
    Left,
    /// Towards the last needle.
    Right,
}

impl Direction {
    /// Opposite direction.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// `-1` for left, `+1` for right.
    #[must_use]
    pub const fn step(self) -> i32 {
        match self {
            Self::Left => -1,
            Self::Right => 1,
        }
    }

    /// Direction identifier reported in state indications.
    #[must_use]
    pub const fn wire_code(self) -> u8 {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "Left",
            Self::Right => "Right",
        })
    }
}

/// Side of the bed the carriage starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StartSide {
    /// Start beyond needle 0 and knit rightwards first.
    #[default]
    Left,
    /// Start beyond the last needle and knit leftwards first.
    Right,
}

impl StartSide {
    /// Direction of the first pass away from this side.
    #[must_use]
    pub const fn first_direction(self) -> Direction {
        match self {
            Self::Left => Direction::Right,
            Self::Right => Direction::Left,
        }
    }
}

impl fmt::Display for StartSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "Left",
            Self::Right => "Right",
        })
    }
}

impl FromStr for StartSide {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            _ => Err(ConfigError::UnknownStartSide(s.to_string())),
        }
    }
}

/// Carriage positions (inclusive) where each hall sensor sees a magnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HallBands {
    left: (i32, i32),
    right: (i32, i32),
}

impl HallBands {
    /// Validates that both bands are ordered and the left band strictly
    /// precedes the right band.
    pub fn new(left: (i32, i32), right: (i32, i32)) -> Result<Self, ConfigError> {
        if left.0 > left.1 || right.0 > right.1 || left.1 >= right.0 {
            return Err(ConfigError::OverlappingHallBands { left, right });
        }
        Ok(Self { left, right })
    }

    /// Left sensor band.
    #[must_use]
    pub const fn left(&self) -> (i32, i32) {
        self.left
    }

    /// Right sensor band.
    #[must_use]
    pub const fn right(&self) -> (i32, i32) {
        self.right
    }

    /// Whether either sensor can see a magnet with the carriage at `position`.
    #[must_use]
    pub const fn covers(&self, position: i32) -> bool {
        (self.left.0 <= position && position <= self.left.1)
            || (self.right.0 <= position && position <= self.right.1)
    }
}

/// Immutable machine configuration for one simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineConfig {
    machine: MachineFamily,
    carriage: CarriageFamily,
    belt_phase: BeltPhase,
    start_side: StartSide,
    hall_bands: HallBands,
    start_needle: u16,
    stop_needle: u16,
}

impl Default for MachineConfig {
    fn default() -> Self {
        let machine = MachineFamily::default();
        let needles = machine.needle_count();
        let (left, right) = strategy(CarriageFamily::Knit).hall_bands(i32::from(needles));
        Self {
            machine,
            carriage: CarriageFamily::Knit,
            belt_phase: BeltPhase::Regular,
            start_side: StartSide::Left,
            hall_bands: HallBands { left, right },
            start_needle: 0,
            stop_needle: needles - 1,
        }
    }
}

impl MachineConfig {
    /// Starts a builder for `machine` with default carriage, belt and range.
    #[must_use]
    pub const fn builder(machine: MachineFamily) -> MachineConfigBuilder {
        MachineConfigBuilder {
            machine,
            carriage: None,
            belt_phase: BeltPhase::Regular,
            start_side: StartSide::Left,
            start_needle: None,
            stop_needle: None,
        }
    }

    /// Machine family.
    #[must_use]
    pub const fn machine(&self) -> MachineFamily {
        self.machine
    }

    /// Carriage family (KH-270 always reports [`CarriageFamily::Knit270`]).
    #[must_use]
    pub const fn carriage(&self) -> CarriageFamily {
        self.carriage
    }

    /// Belt phase mode.
    #[must_use]
    pub const fn belt_phase(&self) -> BeltPhase {
        self.belt_phase
    }

    /// Start side.
    #[must_use]
    pub const fn start_side(&self) -> StartSide {
        self.start_side
    }

    /// Hall sensor trigger bands.
    #[must_use]
    pub const fn hall_bands(&self) -> HallBands {
        self.hall_bands
    }

    /// First needle of the pattern range.
    #[must_use]
    pub const fn start_needle(&self) -> u16 {
        self.start_needle
    }

    /// Last needle of the pattern range (inclusive).
    #[must_use]
    pub const fn stop_needle(&self) -> u16 {
        self.stop_needle
    }

    /// Needles on the bed.
    #[must_use]
    pub const fn needle_count(&self) -> u16 {
        self.machine.needle_count()
    }

    /// Solenoids in the selector.
    #[must_use]
    pub const fn solenoid_count(&self) -> u16 {
        self.machine.solenoid_count()
    }
}

/// Builder for [`MachineConfig`]; [`Self::build`] validates the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfigBuilder {
    machine: MachineFamily,
    carriage: Option<CarriageFamily>,
    belt_phase: BeltPhase,
    start_side: StartSide,
    start_needle: Option<u16>,
    stop_needle: Option<u16>,
}

impl MachineConfigBuilder {
    /// Requests a carriage family.
    #[must_use]
    pub const fn carriage(mut self, carriage: CarriageFamily) -> Self {
        self.carriage = Some(carriage);
        self
    }

    /// Sets the belt phase mode.
    #[must_use]
    pub const fn belt_phase(mut self, belt_phase: BeltPhase) -> Self {
        self.belt_phase = belt_phase;
        self
    }

    /// Sets the start side.
    #[must_use]
    pub const fn start_side(mut self, start_side: StartSide) -> Self {
        self.start_side = start_side;
        self
    }

    /// Sets the first pattern needle.
    #[must_use]
    pub const fn start_needle(mut self, needle: u16) -> Self {
        self.start_needle = Some(needle);
        self
    }

    /// Sets the last pattern needle.
    #[must_use]
    pub const fn stop_needle(mut self, needle: u16) -> Self {
        self.stop_needle = Some(needle);
        self
    }

    /// Validates and produces the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the carriage does not fit the machine,
    /// cannot be detected from the chosen start side, or the needle range is
    /// empty or off the bed.
    pub fn build(self) -> Result<MachineConfig, ConfigError> {
        let carriage = resolve_carriage(self.machine, self.carriage)?;
        if self.start_side == StartSide::Right && !right_sensor_detects(self.machine, carriage) {
            return Err(ConfigError::UndetectableFromRight {
                machine: self.machine.name(),
                carriage: carriage.name(),
            });
        }
        let needle_count = self.machine.needle_count();
        let start_needle = self.start_needle.unwrap_or(0);
        let stop_needle = self.stop_needle.unwrap_or(needle_count - 1);

        for needle in [start_needle, stop_needle] {
            if needle >= needle_count {
                return Err(ConfigError::NeedleOutOfRange {
                    needle,
                    needle_count,
                });
            }
        }
        if start_needle > stop_needle {
            return Err(ConfigError::InvertedNeedleRange {
                start: start_needle,
                stop: stop_needle,
            });
        }

        let (left, right) = strategy(carriage).hall_bands(i32::from(needle_count));
        let hall_bands = HallBands::new(left, right)?;

        Ok(MachineConfig {
            machine: self.machine,
            carriage,
            belt_phase: self.belt_phase,
            start_side: self.start_side,
            hall_bands,
            start_needle,
            stop_needle,
        })
    }
}

fn resolve_carriage(
    machine: MachineFamily,
    requested: Option<CarriageFamily>,
) -> Result<CarriageFamily, ConfigError> {
    let requested = requested.unwrap_or_default();
    match (machine, requested) {
        (MachineFamily::Kh270, CarriageFamily::Knit | CarriageFamily::Knit270) => {
            Ok(CarriageFamily::Knit270)
        }
        (MachineFamily::Kh270, _) | (_, CarriageFamily::Knit270) => {
            Err(ConfigError::UnsupportedCarriage {
                machine: machine.name(),
                carriage: requested.name(),
            })
        }
        (_, carriage) => Ok(carriage),
    }
}

// The KH-910 right sensor is a digital input: it misses south poles and
// cannot tell a garter carriage from a knit one.
const fn right_sensor_detects(machine: MachineFamily, carriage: CarriageFamily) -> bool {
    !matches!(
        (machine, carriage),
        (MachineFamily::Kh910, CarriageFamily::Lace | CarriageFamily::Garter)
    )
}

/// Options for the automated test harness.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TestConfig {
    pattern: String,
    expected: String,
    line_delay_ticks: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_TEST_PATTERN.to_string(),
            expected: DEFAULT_TEST_PATTERN.to_string(),
            line_delay_ticks: DEFAULT_LINE_DELAY_TICKS,
        }
    }
}

impl TestConfig {
    /// Uses `pattern` both as the knitted line and as the expected result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for an empty pattern or one
    /// containing characters other than `|` and `.`.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        validate_pattern(pattern)?;
        Ok(Self {
            pattern: pattern.to_string(),
            expected: pattern.to_string(),
            ..Self::default()
        })
    }

    /// Replaces the expected needle pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] as for [`Self::new`].
    pub fn with_expected(mut self, expected: &str) -> Result<Self, ConfigError> {
        validate_pattern(expected)?;
        self.expected = expected.to_string();
        Ok(self)
    }

    /// Sets the line response delay.
    #[must_use]
    pub const fn with_line_delay(mut self, ticks: u32) -> Self {
        self.line_delay_ticks = ticks;
        self
    }

    /// Pattern sent to the firmware, repeated across the needle range.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Pattern the knitted needles are compared against.
    #[must_use]
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Ticks between a line request and its response.
    #[must_use]
    pub const fn line_delay_ticks(&self) -> u32 {
        self.line_delay_ticks
    }
}

fn validate_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() || !pattern.bytes().all(|b| b == b'|' || b == b'.') {
        return Err(ConfigError::InvalidPattern(pattern.to_string()));
    }
    Ok(())
}
