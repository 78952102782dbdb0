//! Simulation context tying the carriage model to a microcontroller.
//!
//! A [`Simulator`] owns all mutable state of one run. Each call to
//! [`Simulator::step`] is one iteration of the outer loop: an optional
//! mechanical tick, one slice of microcontroller execution, then delivery of
//! everything the microcontroller produced during that slice.

use log::{debug, info, log_enabled, warn, Level};

use crate::codec::{encode_frame, FrameAccumulator};
use crate::config::{Direction, MachineConfig, TestConfig};
use crate::error::ProtocolFault;
use crate::harness::{TestHarness, Verdict};
use crate::machine::{Machine, SensorOutputs};
use crate::protocol;
use crate::queue::{Event, EventConsumer, EventKind};
use crate::shield::ShieldIndicators;
use crate::signals::{
    Line, Mcu, McuEvent, ADC_CHANNEL_HALL_LEFT, ADC_CHANNEL_HALL_RIGHT,
};
use crate::trace::{FrameDirection, TraceLog};

/// Emulated time that must elapse between two mechanical ticks.
pub const TICK_INTERVAL_USEC: u64 = 10_000;

/// Result of one [`Simulator::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// Keep stepping.
    Running,
    /// The microcontroller reported a terminal state.
    Halted,
    /// The test harness reached a verdict.
    Finished(Verdict),
}

/// Owns the machine model, the microcontroller and the protocol plumbing
/// between them.
#[derive(Debug)]
pub struct Simulator<M: Mcu> {
    machine: Machine,
    mcu: M,
    events: EventConsumer,
    harness: Option<TestHarness>,
    from_device: FrameAccumulator,
    trace: TraceLog,
    indicators: ShieldIndicators,
    tracing: bool,
    last_tick_usec: u64,
    ticks: u64,
    verdict: Option<Verdict>,
}

impl<M: Mcu> Simulator<M> {
    /// Builds a simulator in observation mode: carriage moves come from
    /// `events` only.
    pub fn new(config: &MachineConfig, mut mcu: M, events: EventConsumer) -> Self {
        let machine = Machine::new(config);
        raise_outputs(&mut mcu, machine.outputs());
        Self {
            machine,
            mcu,
            events,
            harness: None,
            from_device: FrameAccumulator::new(),
            trace: TraceLog::new(),
            indicators: ShieldIndicators::new(),
            tracing: false,
            last_tick_usec: 0,
            ticks: 0,
            verdict: None,
        }
    }

    /// Switches to test mode: the harness drives the carriage and the
    /// serial line.
    #[must_use]
    pub fn with_harness(mut self, test: TestConfig) -> Self {
        self.harness = Some(TestHarness::new(self.machine.config(), test));
        self
    }

    /// Enables or disables protocol trace logging.
    pub fn set_tracing(&mut self, tracing: bool) {
        self.tracing = tracing;
    }

    /// Whether protocol trace logging is enabled.
    #[must_use]
    pub const fn tracing(&self) -> bool {
        self.tracing
    }

    /// Carriage model.
    #[must_use]
    pub const fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Microcontroller.
    #[must_use]
    pub const fn mcu(&self) -> &M {
        &self.mcu
    }

    /// Shield LEDs and beeper.
    #[must_use]
    pub const fn indicators(&self) -> &ShieldIndicators {
        &self.indicators
    }

    /// Decoded frames seen on the serial line.
    #[must_use]
    pub const fn trace(&self) -> &TraceLog {
        &self.trace
    }

    /// Test harness, in test mode.
    #[must_use]
    pub const fn harness(&self) -> Option<&TestHarness> {
        self.harness.as_ref()
    }

    /// Mechanical ticks performed so far.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Events queued but not yet consumed by a tick.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Emulated time in microseconds.
    #[must_use]
    pub fn now_usec(&self) -> u64 {
        self.mcu.cycles_to_usec(self.mcu.cycle())
    }

    /// Runs one outer-loop iteration.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolFault`] when the harness receives a message the
    /// firmware should never send.
    pub fn step(&mut self) -> Result<StepStatus, ProtocolFault> {
        if let Some(verdict) = &self.verdict {
            return Ok(StepStatus::Finished(verdict.clone()));
        }

        let now = self.now_usec();
        if now < self.last_tick_usec {
            // The cycle counter went backwards, e.g. across a reset.
            self.last_tick_usec = now;
        }
        if now.saturating_sub(self.last_tick_usec) > TICK_INTERVAL_USEC {
            self.last_tick_usec = now;
            self.tick();
        }

        let state = self.mcu.step();
        self.drain_mcu_events()?;
        self.inject_outgoing();

        if let Some(verdict) = &self.verdict {
            return Ok(StepStatus::Finished(verdict.clone()));
        }
        if state.is_terminal() {
            info!("microcontroller stopped: {state:?}");
            return Ok(StepStatus::Halted);
        }
        Ok(StepStatus::Running)
    }

    /// Steps until the run stops or `max_steps` iterations have run.
    ///
    /// # Errors
    ///
    /// Propagates the first [`ProtocolFault`] from [`Simulator::step`].
    pub fn run(&mut self, max_steps: u64) -> Result<StepStatus, ProtocolFault> {
        for _ in 0..max_steps {
            match self.step()? {
                StepStatus::Running => {}
                done => return Ok(done),
            }
        }
        Ok(StepStatus::Running)
    }

    fn tick(&mut self) {
        self.ticks += 1;
        if let Some(event) = self.events.pop() {
            self.handle_event(event);
        }

        let planned = self
            .harness
            .as_mut()
            .and_then(|harness| harness.on_tick(&self.machine));
        if let Some(direction) = planned {
            self.move_carriage(direction);
            if let Some(harness) = self.harness.as_mut() {
                if let Some(verdict) = harness.after_move(&self.machine) {
                    self.verdict = Some(verdict);
                }
            }
        }

        if self.machine.take_dirty() {
            if log_enabled!(Level::Debug) {
                debug!("{}", self.machine.render_status());
                debug!("{}", self.indicators.render());
                debug!("{}", self.trace.contents());
                debug!("\n{}", self.machine.render_bed());
            }
            self.indicators.after_display();
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event.kind {
            EventKind::Reset => {
                info!("reset requested");
                self.mcu.reset();
            }
            EventKind::ToggleTrace => {
                self.tracing = !self.tracing;
                info!(
                    "protocol tracing {}",
                    if self.tracing { "on" } else { "off" }
                );
            }
            EventKind::MoveLeft => self.move_carriage(Direction::Left),
            EventKind::MoveRight => self.move_carriage(Direction::Right),
        }
    }

    fn move_carriage(&mut self, direction: Direction) {
        let outputs = self.machine.apply(direction);
        raise_outputs(&mut self.mcu, outputs);
    }

    fn drain_mcu_events(&mut self) -> Result<(), ProtocolFault> {
        while let Some(event) = self.mcu.poll_event() {
            match event {
                McuEvent::SolenoidWrite(register) => self.machine.set_solenoid_register(register),
                McuEvent::AdcTrigger(ADC_CHANNEL_HALL_RIGHT) => {
                    let value = self.machine.hall().right;
                    self.mcu.raise(Line::HallRight, value);
                }
                McuEvent::AdcTrigger(ADC_CHANNEL_HALL_LEFT) => {
                    let value = self.machine.hall().left;
                    self.mcu.raise(Line::HallLeft, value);
                }
                McuEvent::AdcTrigger(channel) => {
                    warn!("conversion requested on unconnected ADC channel {channel}");
                }
                McuEvent::SerialOut(byte) => {
                    if let Some(frame) = self.from_device.push(byte) {
                        self.on_device_frame(&frame)?;
                    }
                }
                McuEvent::Beeper(duty) => self.indicators.record_beeper(duty),
                McuEvent::Led { index, on } => self.indicators.set_led(index, on),
            }
        }
        Ok(())
    }

    fn on_device_frame(&mut self, frame: &[u8]) -> Result<(), ProtocolFault> {
        self.record(FrameDirection::FromDevice, frame);
        match self.harness.as_mut() {
            Some(harness) => harness.on_frame(frame),
            None => Ok(()),
        }
    }

    fn inject_outgoing(&mut self) {
        let Some(harness) = self.harness.as_mut() else {
            return;
        };
        for message in harness.take_outgoing() {
            for byte in encode_frame(&message) {
                self.mcu.inject_serial(byte);
            }
            self.record(FrameDirection::ToDevice, &message);
        }
    }

    fn record(&mut self, direction: FrameDirection, frame: &[u8]) {
        self.trace.record(direction, frame);
        if self.tracing {
            let now = self.now_usec();
            info!(
                "{:>6}.{:03} ms {} {}",
                now / 1000,
                now % 1000,
                direction.prefix(),
                protocol::describe(frame)
            );
        }
    }

    /// Multi-line status display: solenoids and sensors, shield
    /// indicators, protocol trace and needle bed.
    #[must_use]
    pub fn render_display(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.machine.render_status(),
            self.indicators.render(),
            self.trace.contents(),
            self.machine.render_bed()
        )
    }
}

fn raise_outputs<M: Mcu>(mcu: &mut M, outputs: SensorOutputs) {
    mcu.raise(Line::EncoderV2, u16::from(outputs.v2));
    mcu.raise(Line::EncoderV1, u16::from(outputs.v1));
    mcu.raise(Line::BeltPhase, u16::from(outputs.belt_phase));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MachineFamily, StartSide};
    use crate::firmware::ReferenceFirmware;
    use crate::queue::event_queue;
    use crate::signals::{IdleMcu, McuState, SignalSink};

    fn knit_config() -> MachineConfig {
        MachineConfig::builder(MachineFamily::Kh930)
            .build()
            .unwrap()
    }

    #[test]
    fn ticks_are_throttled_to_every_fifth_step() {
        let (_producer, consumer) = event_queue();
        let mut sim = Simulator::new(&knit_config(), IdleMcu::new(), consumer);
        for _ in 0..5 {
            sim.step().unwrap();
        }
        assert_eq!(sim.ticks(), 0);
        sim.step().unwrap();
        assert_eq!(sim.ticks(), 1);
        for _ in 0..5 {
            sim.step().unwrap();
        }
        assert_eq!(sim.ticks(), 2);
    }

    /// Clears its cycle counter on reset, unlike [`IdleMcu`].
    #[derive(Debug, Default)]
    struct RewindingMcu {
        cycle: u64,
    }

    impl SignalSink for RewindingMcu {
        fn raise(&mut self, _line: Line, _value: u16) {}
    }

    impl Mcu for RewindingMcu {
        fn step(&mut self) -> McuState {
            self.cycle += IdleMcu::CYCLES_PER_STEP;
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
            self.cycle = 0;
        }
    }

    #[test]
    fn ticks_resume_after_the_cycle_counter_rewinds() {
        let (mut producer, consumer) = event_queue();
        let mut sim = Simulator::new(&knit_config(), RewindingMcu::default(), consumer);
        sim.run(50).unwrap();
        let before = sim.ticks();
        assert_eq!(before, 9);

        producer.push(EventKind::Reset).unwrap();
        sim.run(6).unwrap();
        assert_eq!(sim.now_usec(), 6 * 2_500);
        assert_eq!(sim.ticks(), before + 1);

        sim.run(1).unwrap();
        assert_eq!(sim.ticks(), before + 2);
    }

    #[test]
    fn queued_moves_drive_the_encoder_lines() {
        let (mut producer, consumer) = event_queue();
        let mut sim = Simulator::new(&knit_config(), IdleMcu::new(), consumer);
        producer.push(EventKind::MoveRight).unwrap();
        sim.run(6).unwrap();
        assert_eq!(sim.machine().phase(), 1);
        let raised = sim.mcu.take_raised();
        assert!(raised.contains(&(Line::EncoderV2, 1)));
        assert!(raised.contains(&(Line::EncoderV1, 0)));
    }

    #[test]
    fn reset_and_trace_toggle_events() {
        let (mut producer, consumer) = event_queue();
        let mut sim = Simulator::new(&knit_config(), IdleMcu::new(), consumer);
        producer.push(EventKind::Reset).unwrap();
        producer.push(EventKind::ToggleTrace).unwrap();
        sim.run(11).unwrap();
        assert_eq!(sim.mcu().resets(), 1);
        assert!(sim.tracing());
        assert_eq!(sim.machine().position(), -24);
    }

    #[test]
    fn harness_run_passes_against_reference_firmware() {
        let config = MachineConfig::builder(MachineFamily::Kh930)
            .start_side(StartSide::Left)
            .build()
            .unwrap();
        let (_producer, consumer) = event_queue();
        let firmware = ReferenceFirmware::new(MachineFamily::Kh930);
        let mut sim = Simulator::new(&config, firmware, consumer)
            .with_harness(TestConfig::new("|.").unwrap());
        let status = sim.run(200_000).unwrap();
        assert_eq!(status, StepStatus::Finished(Verdict::Passed { rows: 2 }));
        assert!(sim.indicators().beeper_history().ends_with("^ "));
        assert!(sim.trace().contents().contains('<'));
    }

    #[test]
    fn display_has_status_indicators_and_bed() {
        let (_producer, consumer) = event_queue();
        let sim = Simulator::new(&knit_config(), IdleMcu::new(), consumer);
        let display = sim.render_display();
        assert!(display.starts_with("S=["));
        assert!(display.contains("LEDs=(o, *)"));
        assert!(display.contains("<- "));
    }
}
