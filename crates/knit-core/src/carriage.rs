//! Per-carriage geometry: home position, selector offset, hall magnets and
//! the solenoid-to-needle mapping.

use std::fmt;

use crate::config::{BeltPhase, CarriageFamily, Direction, MachineFamily};

/// Hall sensor reading with no magnet in range.
pub const HALL_IDLE: u16 = 1650;
/// Hall sensor reading over a north pole.
pub const HALL_NORTH: u16 = 2200;
/// Hall sensor reading over a south pole.
pub const HALL_SOUTH: u16 = 100;
/// Reading of the KH-910 right sensor, which is wired as a digital input.
pub const HALL_DIGITAL_LOW: u16 = 0;

/// Inclusive range of carriage positions.
pub type Band = (i32, i32);

/// Left and right hall sensor values for one carriage position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HallReadings {
    /// Left end-of-line sensor.
    pub left: u16,
    /// Right end-of-line sensor.
    pub right: u16,
}

impl Default for HallReadings {
    fn default() -> Self {
        Self {
            left: HALL_IDLE,
            right: HALL_IDLE,
        }
    }
}

impl HallReadings {
    const fn left(value: u16) -> Self {
        Self {
            left: value,
            right: HALL_IDLE,
        }
    }

    const fn right(value: u16) -> Self {
        Self {
            left: HALL_IDLE,
            right: value,
        }
    }
}

// The KH-910 right sensor sees north as a digital low and cannot see south.
const fn right_north(machine: MachineFamily) -> u16 {
    match machine {
        MachineFamily::Kh910 => HALL_DIGITAL_LOW,
        _ => HALL_NORTH,
    }
}

const fn right_south(machine: MachineFamily) -> u16 {
    match machine {
        MachineFamily::Kh910 => HALL_IDLE,
        _ => HALL_SOUTH,
    }
}

/// Geometry of one carriage family.
pub trait NeedleMapping: fmt::Debug + Send + Sync {
    /// Family this mapping describes.
    fn family(&self) -> CarriageFamily;

    /// Position at which the leading selector of a rightward pass sits on
    /// needle 0 at encoder phase 0.
    fn home_position(&self) -> i32;

    /// Distance from the carriage position to its active selector.
    fn select_offset(&self, direction: Direction) -> i32;

    /// Left and right trigger bands for a bed of `needle_count` needles.
    fn hall_bands(&self, needle_count: i32) -> (Band, Band);

    /// Sensor values with the carriage at `position`.
    fn hall_readings(
        &self,
        position: i32,
        needle_count: i32,
        machine: MachineFamily,
    ) -> HallReadings;

    /// Whether the mapping shifts by half a solenoid cycle when moving left.
    fn shifts_when_moving_left(&self) -> bool {
        false
    }

    /// Solenoid bit (in extracted solenoid space) that drives `needle`.
    fn armature_index(
        &self,
        needle: i32,
        direction: Direction,
        belt: BeltPhase,
        machine: MachineFamily,
    ) -> u16 {
        let n = i32::from(machine.solenoid_count());
        let half = n / 2;
        let moving_left = direction == Direction::Left;
        let index = match machine {
            MachineFamily::Kh270 => needle + 4 + if moving_left { half } else { 0 },
            MachineFamily::Kh910 | MachineFamily::Kh930 => {
                let belt_shift = if belt == BeltPhase::Shifted { half } else { 0 };
                let direction_shift = if moving_left && self.shifts_when_moving_left() {
                    half
                } else {
                    0
                };
                needle + belt_shift + direction_shift
            }
        };
        // rem_euclid keeps the value in 0..n, which always fits u16.
        u16::try_from(index.rem_euclid(n)).unwrap_or_default()
    }
}

/// Standard knit carriage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Knit;

/// Lace carriage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lace;

/// Garter carriage, which carries both magnet polarities.
#[derive(Debug, Clone, Copy, Default)]
pub struct Garter;

/// KH-270 knit carriage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Knit270;

impl NeedleMapping for Knit {
    fn family(&self) -> CarriageFamily {
        CarriageFamily::Knit
    }

    fn home_position(&self) -> i32 {
        24
    }

    fn select_offset(&self, direction: Direction) -> i32 {
        -24 * direction.step()
    }

    fn hall_bands(&self, needle_count: i32) -> (Band, Band) {
        ((0, 0), (needle_count - 1, needle_count - 1))
    }

    fn hall_readings(
        &self,
        position: i32,
        needle_count: i32,
        machine: MachineFamily,
    ) -> HallReadings {
        if position == 0 {
            HallReadings::left(HALL_NORTH)
        } else if position == needle_count - 1 {
            HallReadings::right(right_north(machine))
        } else {
            HallReadings::default()
        }
    }
}

impl NeedleMapping for Lace {
    fn family(&self) -> CarriageFamily {
        CarriageFamily::Lace
    }

    fn home_position(&self) -> i32 {
        12
    }

    fn select_offset(&self, direction: Direction) -> i32 {
        -12 * direction.step()
    }

    fn hall_bands(&self, needle_count: i32) -> (Band, Band) {
        ((0, 0), (needle_count - 1, needle_count - 1))
    }

    fn hall_readings(
        &self,
        position: i32,
        needle_count: i32,
        machine: MachineFamily,
    ) -> HallReadings {
        if position == 0 {
            HallReadings::left(HALL_SOUTH)
        } else if position == needle_count - 1 {
            HallReadings::right(right_south(machine))
        } else {
            HallReadings::default()
        }
    }

    fn shifts_when_moving_left(&self) -> bool {
        true
    }
}

impl NeedleMapping for Garter {
    fn family(&self) -> CarriageFamily {
        CarriageFamily::Garter
    }

    fn home_position(&self) -> i32 {
        0
    }

    fn select_offset(&self, _direction: Direction) -> i32 {
        0
    }

    fn hall_bands(&self, needle_count: i32) -> (Band, Band) {
        ((-12, 12), (needle_count - 13, needle_count + 11))
    }

    fn hall_readings(
        &self,
        position: i32,
        needle_count: i32,
        machine: MachineFamily,
    ) -> HallReadings {
        match position {
            -12 | 12 => HallReadings::left(HALL_SOUTH),
            -10 | 10 => HallReadings::left(HALL_NORTH),
            p if p == needle_count - 13 || p == needle_count + 11 => {
                HallReadings::right(right_south(machine))
            }
            p if p == needle_count - 11 || p == needle_count + 9 => {
                HallReadings::right(right_north(machine))
            }
            _ => HallReadings::default(),
        }
    }
}

impl NeedleMapping for Knit270 {
    fn family(&self) -> CarriageFamily {
        CarriageFamily::Knit270
    }

    fn home_position(&self) -> i32 {
        15
    }

    fn select_offset(&self, direction: Direction) -> i32 {
        -15 * direction.step()
    }

    fn hall_bands(&self, needle_count: i32) -> (Band, Band) {
        ((-6, 0), (needle_count - 1, needle_count + 5))
    }

    fn hall_readings(
        &self,
        position: i32,
        needle_count: i32,
        _machine: MachineFamily,
    ) -> HallReadings {
        match position {
            -6 | 0 => HallReadings::left(HALL_NORTH),
            p if p == needle_count - 1 || p == needle_count + 5 => HallReadings::right(HALL_NORTH),
            _ => HallReadings::default(),
        }
    }
}

static KNIT: Knit = Knit;
static LACE: Lace = Lace;
static GARTER: Garter = Garter;
static KNIT270: Knit270 = Knit270;

/// Returns the mapping for `family`.
#[must_use]
pub fn strategy(family: CarriageFamily) -> &'static dyn NeedleMapping {
    match family {
        CarriageFamily::Knit => &KNIT,
        CarriageFamily::Lace => &LACE,
        CarriageFamily::Garter => &GARTER,
        CarriageFamily::Knit270 => &KNIT270,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CarriageFamily::Knit, 24, -24, 24)]
    #[case(CarriageFamily::Lace, 12, -12, 12)]
    #[case(CarriageFamily::Garter, 0, 0, 0)]
    #[case(CarriageFamily::Knit270, 15, -15, 15)]
    fn offsets_are_negative_when_moving_right(
        #[case] family: CarriageFamily,
        #[case] home: i32,
        #[case] right: i32,
        #[case] left: i32,
    ) {
        let mapping = strategy(family);
        assert_eq!(mapping.family(), family);
        assert_eq!(mapping.home_position(), home);
        assert_eq!(mapping.select_offset(Direction::Right), right);
        assert_eq!(mapping.select_offset(Direction::Left), left);
    }

    #[rstest]
    #[case(CarriageFamily::Knit, 0, HALL_NORTH, HALL_IDLE)]
    #[case(CarriageFamily::Knit, 199, HALL_IDLE, HALL_NORTH)]
    #[case(CarriageFamily::Lace, 0, HALL_SOUTH, HALL_IDLE)]
    #[case(CarriageFamily::Lace, 199, HALL_IDLE, HALL_SOUTH)]
    #[case(CarriageFamily::Garter, -12, HALL_SOUTH, HALL_IDLE)]
    #[case(CarriageFamily::Garter, 10, HALL_NORTH, HALL_IDLE)]
    #[case(CarriageFamily::Garter, 187, HALL_IDLE, HALL_SOUTH)]
    #[case(CarriageFamily::Garter, 209, HALL_IDLE, HALL_NORTH)]
    #[case(CarriageFamily::Knit, 100, HALL_IDLE, HALL_IDLE)]
    fn kh930_hall_readings(
        #[case] family: CarriageFamily,
        #[case] position: i32,
        #[case] left: u16,
        #[case] right: u16,
    ) {
        let readings = strategy(family).hall_readings(position, 200, MachineFamily::Kh930);
        assert_eq!(readings, HallReadings { left, right });
    }

    #[test]
    fn kh910_right_sensor_quirks() {
        let knit = strategy(CarriageFamily::Knit).hall_readings(199, 200, MachineFamily::Kh910);
        assert_eq!(knit.right, HALL_DIGITAL_LOW);
        let lace = strategy(CarriageFamily::Lace).hall_readings(199, 200, MachineFamily::Kh910);
        assert_eq!(lace.right, HALL_IDLE);
    }

    #[test]
    fn knit270_sees_two_north_magnets_per_side() {
        let mapping = strategy(CarriageFamily::Knit270);
        for position in [-6, 0] {
            assert_eq!(
                mapping.hall_readings(position, 112, MachineFamily::Kh270).left,
                HALL_NORTH
            );
        }
        for position in [111, 117] {
            assert_eq!(
                mapping.hall_readings(position, 112, MachineFamily::Kh270).right,
                HALL_NORTH
            );
        }
        assert_eq!(mapping.hall_bands(112), ((-6, 0), (111, 117)));
    }

    #[rstest]
    #[case(CarriageFamily::Knit, 5, Direction::Left, BeltPhase::Regular, MachineFamily::Kh930, 5)]
    #[case(CarriageFamily::Knit, 5, Direction::Right, BeltPhase::Shifted, MachineFamily::Kh930, 13)]
    #[case(CarriageFamily::Lace, 5, Direction::Left, BeltPhase::Regular, MachineFamily::Kh930, 13)]
    #[case(CarriageFamily::Lace, 5, Direction::Left, BeltPhase::Shifted, MachineFamily::Kh930, 5)]
    #[case(CarriageFamily::Lace, 5, Direction::Right, BeltPhase::Regular, MachineFamily::Kh930, 5)]
    #[case(CarriageFamily::Knit270, 0, Direction::Right, BeltPhase::Regular, MachineFamily::Kh270, 4)]
    #[case(CarriageFamily::Knit270, 0, Direction::Left, BeltPhase::Shifted, MachineFamily::Kh270, 10)]
    #[case(CarriageFamily::Knit270, 110, Direction::Left, BeltPhase::Regular, MachineFamily::Kh270, 0)]
    fn armature_index_mapping(
        #[case] family: CarriageFamily,
        #[case] needle: i32,
        #[case] direction: Direction,
        #[case] belt: BeltPhase,
        #[case] machine: MachineFamily,
        #[case] expected: u16,
    ) {
        assert_eq!(
            strategy(family).armature_index(needle, direction, belt, machine),
            expected
        );
    }
}
