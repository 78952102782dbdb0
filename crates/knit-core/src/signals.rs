//! Contracts between the carriage model and the microcontroller under test.
//!
//! The microcontroller side is any type implementing [`Mcu`]. It receives
//! named input lines from the model and reports its own outputs as a stream
//! of [`McuEvent`] values drained once per step.

/// ADC channel wired to the right hall sensor.
pub const ADC_CHANNEL_HALL_RIGHT: u8 = 0;
/// ADC channel wired to the left hall sensor.
pub const ADC_CHANNEL_HALL_LEFT: u8 = 1;

/// Named input lines driven into the microcontroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Line {
    /// Encoder channel 1 (digital).
    EncoderV1,
    /// Encoder channel 2 (digital).
    EncoderV2,
    /// Belt phase sensor (digital).
    BeltPhase,
    /// Left hall sensor (analog, ADC counts in millivolts).
    HallLeft,
    /// Right hall sensor (analog, ADC counts in millivolts).
    HallRight,
}

/// Receiver of input line changes.
pub trait SignalSink {
    /// Drives `line` to `value`; digital lines use `0` and `1`.
    fn raise(&mut self, line: Line, value: u16);
}

/// Output produced by the microcontroller during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McuEvent {
    /// New value of the composite 16-bit solenoid output register.
    SolenoidWrite(u16),
    /// Conversion requested on an ADC channel.
    AdcTrigger(u8),
    /// Byte transmitted on the serial line.
    SerialOut(u8),
    /// Beeper PWM duty (0 = on, 255 = off).
    Beeper(u8),
    /// Status LED change.
    Led {
        /// LED index (0 or 1).
        index: u8,
        /// New level.
        on: bool,
    },
}

/// Execution state reported after each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McuState {
    /// Executing normally.
    Running,
    /// Idle until the next interrupt.
    Sleeping,
    /// Finished; the simulation stops.
    Done,
    /// Faulted; the simulation stops.
    Crashed,
}

impl McuState {
    /// Returns `true` when the simulation must stop.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Crashed)
    }
}

/// Microcontroller collaborator driven by the simulator.
pub trait Mcu: SignalSink {
    /// Advances execution by one slice and returns the resulting state.
    fn step(&mut self) -> McuState;

    /// Current cycle counter.
    fn cycle(&self) -> u64;

    /// Converts a cycle count into microseconds at the device clock.
    fn cycles_to_usec(&self, cycles: u64) -> u64;

    /// Next pending output event, if any.
    fn poll_event(&mut self) -> Option<McuEvent>;

    /// Delivers one byte to the serial receiver.
    fn inject_serial(&mut self, byte: u8);

    /// Performs a hardware reset.
    fn reset(&mut self);
}

/// Microcontroller that runs a fixed number of cycles per step and never
/// produces output. Useful for exercising the carriage model on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdleMcu {
    cycle: u64,
    resets: u32,
    last_raised: Vec<(Line, u16)>,
}

impl IdleMcu {
    /// Cycles consumed by each step (2.5 ms at 16 MHz).
    pub const CYCLES_PER_STEP: u64 = 40_000;

    /// Creates an idle microcontroller at cycle 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resets performed.
    #[must_use]
    pub const fn resets(&self) -> u32 {
        self.resets
    }

    /// Lines raised since the last call, oldest first.
    pub fn take_raised(&mut self) -> Vec<(Line, u16)> {
        std::mem::take(&mut self.last_raised)
    }
}

impl SignalSink for IdleMcu {
    fn raise(&mut self, line: Line, value: u16) {
        self.last_raised.push((line, value));
    }
}

impl Mcu for IdleMcu {
    fn step(&mut self) -> McuState {
        self.cycle += Self::CYCLES_PER_STEP;
        McuState::Sleeping
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn cycles_to_usec(&self, cycles: u64) -> u64 {
        cycles / 16
    }

    fn poll_event(&mut self) -> Option<McuEvent> {
        None
    }

    fn inject_serial(&mut self, _byte: u8) {}

    fn reset(&mut self) {
        self.resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_stop_the_loop() {
        assert!(McuState::Done.is_terminal());
        assert!(McuState::Crashed.is_terminal());
        assert!(!McuState::Running.is_terminal());
        assert!(!McuState::Sleeping.is_terminal());
    }

    #[test]
    fn idle_mcu_counts_cycles_and_records_lines() {
        let mut mcu = IdleMcu::new();
        assert_eq!(mcu.step(), McuState::Sleeping);
        assert_eq!(mcu.cycle(), IdleMcu::CYCLES_PER_STEP);
        assert_eq!(mcu.cycles_to_usec(mcu.cycle()), 2_500);
        mcu.raise(Line::EncoderV2, 1);
        mcu.raise(Line::HallLeft, 2200);
        assert_eq!(
            mcu.take_raised(),
            vec![(Line::EncoderV2, 1), (Line::HallLeft, 2200)]
        );
        assert!(mcu.poll_event().is_none());
    }
}
