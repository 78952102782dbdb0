//! Behavioral model of the shield firmware.
//!
//! [`ReferenceFirmware`] implements [`Mcu`] without executing instructions:
//! each step it decodes the encoder, detects the carriage from the hall
//! sensors, and drives the solenoid register for the needles ahead of the
//! selector. It answers the serial protocol like the real firmware does, so
//! the test harness can run end to end.

use std::collections::VecDeque;

use log::{debug, info, warn};

use crate::carriage::{strategy, HALL_IDLE};
use crate::codec::{encode_frame, FrameAccumulator};
use crate::config::{BeltPhase, CarriageFamily, Direction, MachineFamily};
use crate::machine::belt_phase_level;
use crate::protocol::{
    self, bitmap_bit, ApiCode, StateIndication, BITMAP_LEN, FLAG_LAST_LINE, STATE_READY,
};
use crate::signals::{
    Line, Mcu, McuEvent, McuState, SignalSink, ADC_CHANNEL_HALL_LEFT, ADC_CHANNEL_HALL_RIGHT,
};

/// Device clock.
pub const CLOCK_HZ: u64 = 16_000_000;

/// Cycles executed per [`Mcu::step`] (2.5 ms).
pub const CYCLES_PER_STEP: u64 = 40_000;

/// Readings above this are a north pole.
pub const HALL_NORTH_THRESHOLD: u16 = 1900;

/// Readings below this are a south pole (or north on a digital input).
pub const HALL_SOUTH_THRESHOLD: u16 = 400;

/// Needles within which a north pole after a south pole marks a garter carriage.
pub const GARTER_PAIRING_NEEDLES: i32 = 3;

/// Version reported by `cnfInfo`.
pub const FIRMWARE_VERSION: (u8, u8, u8) = (1, 0, 0);

/// Protocol-level operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareState {
    /// Waiting for `reqInit`.
    Idle,
    /// Initialized; waiting for `reqStart`.
    Ready,
    /// Knitting lines.
    Knitting,
    /// Hardware test mode.
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sensor {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pole {
    North,
    South,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineBuffer {
    index: u8,
    bitmap: [u8; BITMAP_LEN],
    ready: bool,
    last: bool,
    worked: Option<Direction>,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self {
            index: 0,
            bitmap: [0; BITMAP_LEN],
            ready: false,
            last: false,
            worked: None,
        }
    }
}

/// Firmware stand-in driven by the simulator.
#[derive(Debug, Clone)]
pub struct ReferenceFirmware {
    machine: MachineFamily,
    state: FirmwareState,
    cycle: u64,
    rx: FrameAccumulator,
    outbox: VecDeque<McuEvent>,
    v1: bool,
    v2: bool,
    belt_level: bool,
    hall_left: u16,
    hall_right: u16,
    sub_step: u8,
    direction: Option<Direction>,
    position: i32,
    carriage: Option<CarriageFamily>,
    pending_south: Option<(Sensor, i32)>,
    belt: Option<BeltPhase>,
    start: u16,
    stop: u16,
    line: LineBuffer,
    register: Option<u16>,
    test_register: u16,
    leds: [bool; 2],
}

impl ReferenceFirmware {
    /// Powers up firmware built for `machine`.
    #[must_use]
    pub fn new(machine: MachineFamily) -> Self {
        Self {
            machine,
            state: FirmwareState::Idle,
            cycle: 0,
            rx: FrameAccumulator::new(),
            outbox: VecDeque::new(),
            v1: false,
            v2: false,
            belt_level: false,
            hall_left: HALL_IDLE,
            hall_right: HALL_IDLE,
            sub_step: 0,
            direction: None,
            position: 0,
            carriage: None,
            pending_south: None,
            belt: None,
            start: 0,
            stop: 0,
            line: LineBuffer::default(),
            register: None,
            test_register: idle_register(machine),
            leds: [false; 2],
        }
    }

    /// Protocol state.
    #[must_use]
    pub const fn state(&self) -> FirmwareState {
        self.state
    }

    /// Carriage detected from the hall sensors, once seen.
    #[must_use]
    pub const fn carriage(&self) -> Option<CarriageFamily> {
        self.carriage
    }

    /// Tracked carriage position (absolute once the carriage is detected).
    #[must_use]
    pub const fn position(&self) -> i32 {
        self.position
    }

    /// Belt phase inferred from the belt-phase sensor, once decided.
    #[must_use]
    pub const fn belt_phase(&self) -> Option<BeltPhase> {
        self.belt
    }

    /// Index of the line currently requested or being knitted.
    #[must_use]
    pub const fn line_index(&self) -> u8 {
        self.line.index
    }

    fn send(&mut self, message: &[u8]) {
        for byte in encode_frame(message) {
            self.outbox.push_back(McuEvent::SerialOut(byte));
        }
    }

    fn set_led(&mut self, index: u8, on: bool) {
        let Some(led) = self.leds.get_mut(usize::from(index)) else {
            return;
        };
        if *led != on {
            *led = on;
            self.outbox.push_back(McuEvent::Led { index, on });
        }
    }

    fn beep(&mut self) {
        self.outbox.push_back(McuEvent::Beeper(0));
        self.outbox.push_back(McuEvent::Beeper(255));
    }

    fn enter(&mut self, state: FirmwareState) {
        if self.state != state {
            debug!("firmware: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
        self.set_led(0, state == FirmwareState::Knitting);
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let (code, payload) = match protocol::split_checksum(frame) {
            Ok(parts) => parts,
            Err(fault) => {
                warn!("firmware: dropping frame: {fault}");
                return;
            }
        };
        match ApiCode::from_byte(code) {
            Some(ApiCode::ReqInit) => self.on_req_init(payload),
            Some(ApiCode::ReqStart) => self.on_req_start(payload),
            Some(ApiCode::CnfLine) => self.on_cnf_line(payload),
            Some(ApiCode::ReqInfo) => {
                let (major, minor, patch) = FIRMWARE_VERSION;
                self.send(&protocol::cnf_info(major, minor, patch));
            }
            Some(ApiCode::ReqTest) => {
                self.send(&protocol::cnf_test(0));
                self.test_register = idle_register(self.machine);
                self.enter(FirmwareState::Test);
            }
            Some(api) if self.state == FirmwareState::Test => self.on_test_command(api, payload),
            _ => warn!(
                "firmware: ignoring {} ({code:#04x})",
                protocol::code_name(code)
            ),
        }
    }

    fn on_req_init(&mut self, payload: &[u8]) {
        let requested = payload.first().copied().and_then(MachineFamily::from_wire_code);
        let Some(machine) = requested else {
            self.send(&protocol::cnf_init(1));
            return;
        };
        self.machine = machine;
        self.line = LineBuffer::default();
        self.send(&protocol::cnf_init(0));
        self.enter(FirmwareState::Ready);
        let indication = self.indication();
        self.send(&indication.encode());
    }

    fn on_req_start(&mut self, payload: &[u8]) {
        let &[start, stop, ..] = payload else {
            self.send(&protocol::cnf_start(1));
            return;
        };
        let (start, stop) = (u16::from(start), u16::from(stop));
        let valid = self.state == FirmwareState::Ready
            && start <= stop
            && stop < self.machine.needle_count();
        if !valid {
            self.send(&protocol::cnf_start(1));
            return;
        }
        self.start = start;
        self.stop = stop;
        self.line = LineBuffer::default();
        self.send(&protocol::cnf_start(0));
        self.enter(FirmwareState::Knitting);
        self.send(&protocol::req_line(0));
        info!("firmware: knitting needles {start}..={stop}");
    }

    fn on_cnf_line(&mut self, payload: &[u8]) {
        let &[line, _color, flags, ref bits @ ..] = payload else {
            warn!("firmware: short cnfLine ({} bytes)", payload.len());
            return;
        };
        if self.state != FirmwareState::Knitting || line != self.line.index {
            warn!(
                "firmware: unexpected cnfLine {line} (waiting for {})",
                self.line.index
            );
            return;
        }
        let Ok(bitmap) = <[u8; BITMAP_LEN]>::try_from(bits.get(..BITMAP_LEN).unwrap_or_default())
        else {
            warn!("firmware: cnfLine {line} bitmap too short");
            return;
        };
        self.line.bitmap = bitmap;
        self.line.ready = true;
        self.line.last = flags & FLAG_LAST_LINE != 0;
        self.line.worked = None;
    }

    fn on_test_command(&mut self, api: ApiCode, payload: &[u8]) {
        match (api, payload) {
            (ApiCode::BeepCmd, _) => self.beep(),
            (ApiCode::SetAllCmd, &[hi, lo, ..]) => {
                self.test_register = u16::from_be_bytes([hi, lo]);
            }
            (ApiCode::SetSingleCmd, &[index, on, ..]) if index < 16 => {
                let bit = 1u16 << index;
                if on == 0 {
                    self.test_register &= !bit;
                } else {
                    self.test_register |= bit;
                }
            }
            (ApiCode::ReadEolSensorsCmd, _) => {
                let text = format!("EOL L={} R={}", self.hall_left, self.hall_right);
                self.send_test_result(&text);
            }
            (ApiCode::ReadEncodersCmd, _) => {
                let text = format!(
                    "Encoders V1={} V2={} BP={}",
                    u8::from(self.v1),
                    u8::from(self.v2),
                    u8::from(self.belt_level)
                );
                self.send_test_result(&text);
            }
            (ApiCode::QuitCmd, _) => self.enter(FirmwareState::Ready),
            _ => self.send_test_result(api.name()),
        }
    }

    fn send_test_result(&mut self, text: &str) {
        let mut body = vec![ApiCode::TestRes.byte()];
        body.extend_from_slice(text.as_bytes());
        self.send(&protocol::stamp(&body));
    }

    fn indication(&self) -> StateIndication {
        StateIndication {
            error: 0,
            state: STATE_READY,
            hall_left: self.hall_left,
            hall_right: self.hall_right,
            carriage: self.carriage.map_or(0xFF, CarriageFamily::wire_code),
            position: u8::try_from(self.position.clamp(0, 255)).unwrap_or_default(),
            direction: self.direction.map_or(0xFF, Direction::wire_code),
        }
    }

    fn classify(&self, sensor: Sensor, value: u16) -> Option<Pole> {
        // The KH-910 right sensor is digital: north pulls it low.
        if sensor == Sensor::Right && self.machine == MachineFamily::Kh910 {
            return (value < HALL_SOUTH_THRESHOLD).then_some(Pole::North);
        }
        if value > HALL_NORTH_THRESHOLD {
            Some(Pole::North)
        } else if value < HALL_SOUTH_THRESHOLD {
            Some(Pole::South)
        } else {
            None
        }
    }

    fn process_hall(&mut self) {
        if let Some((_, seen_at)) = self.pending_south {
            if (self.position - seen_at).abs() > GARTER_PAIRING_NEEDLES {
                self.pending_south = None;
            }
        }
        for (sensor, value) in [
            (Sensor::Left, self.hall_left),
            (Sensor::Right, self.hall_right),
        ] {
            if let Some(pole) = self.classify(sensor, value) {
                self.on_magnet(sensor, pole);
            }
        }
    }

    fn on_magnet(&mut self, sensor: Sensor, pole: Pole) {
        match (self.carriage, pole) {
            (None, Pole::North) => {
                let family = if self.machine == MachineFamily::Kh270 {
                    CarriageFamily::Knit270
                } else {
                    CarriageFamily::Knit
                };
                self.sync(family, sensor);
            }
            (None, Pole::South) if self.machine != MachineFamily::Kh270 => {
                self.sync(CarriageFamily::Lace, sensor);
                self.pending_south = Some((sensor, self.position));
            }
            (Some(CarriageFamily::Lace), Pole::North) => {
                if matches!(self.pending_south, Some((side, _)) if side == sensor) {
                    self.pending_south = None;
                    self.sync(CarriageFamily::Garter, sensor);
                }
            }
            _ => {}
        }
    }

    fn sync(&mut self, family: CarriageFamily, sensor: Sensor) {
        let needles = i32::from(self.machine.needle_count());
        let moving_right = self.direction != Some(Direction::Left);
        self.position = match (family, sensor) {
            (CarriageFamily::Knit | CarriageFamily::Lace, Sensor::Left) => 0,
            (CarriageFamily::Knit | CarriageFamily::Lace, Sensor::Right) => needles - 1,
            (CarriageFamily::Garter, Sensor::Left) => {
                if moving_right {
                    -10
                } else {
                    10
                }
            }
            (CarriageFamily::Garter, Sensor::Right) => {
                if moving_right {
                    needles - 11
                } else {
                    needles + 9
                }
            }
            (CarriageFamily::Knit270, Sensor::Left) => {
                if moving_right {
                    -6
                } else {
                    0
                }
            }
            (CarriageFamily::Knit270, Sensor::Right) => {
                if moving_right {
                    needles - 1
                } else {
                    needles + 5
                }
            }
        };
        self.carriage = Some(family);
        self.belt = None;
        info!(
            "firmware: detected carriage {family} at position {}",
            self.position
        );
    }

    fn decode_encoder(&mut self) {
        let code = (u8::from(self.v1) << 1) | u8::from(self.v2);
        let sub_step = match code {
            0 => 0,
            1 => 1,
            3 => 2,
            _ => 3,
        };
        match (sub_step + 4 - self.sub_step) % 4 {
            0 => {}
            1 => {
                self.direction = Some(Direction::Right);
                if sub_step == 0 {
                    self.position += 1;
                }
            }
            3 => {
                self.direction = Some(Direction::Left);
                if sub_step == 3 {
                    self.position -= 1;
                }
            }
            _ => warn!("firmware: encoder skipped a state"),
        }
        self.sub_step = sub_step;
    }

    fn infer_belt_phase(&mut self) {
        let Some(carriage) = self.carriage else {
            return;
        };
        if self.belt.is_some() || self.machine == MachineFamily::Kh270 {
            return;
        }
        let n = i32::from(self.machine.solenoid_count());
        let home = strategy(carriage).home_position();
        let predict = |shift: i32| {
            let phase = (4 * (self.position - home - shift) + i32::from(self.sub_step))
                .rem_euclid(4 * n);
            belt_phase_level(phase.unsigned_abs(), n.unsigned_abs())
        };
        let regular = predict(0) == self.belt_level;
        let shifted = predict(n / 2) == self.belt_level;
        self.belt = match (regular, shifted) {
            (true, false) => Some(BeltPhase::Regular),
            (false, true) => Some(BeltPhase::Shifted),
            _ => None,
        };
        if let Some(belt) = self.belt {
            debug!("firmware: belt phase {belt}");
        }
    }

    fn selector(&self, carriage: CarriageFamily, direction: Direction) -> i32 {
        self.position + strategy(carriage).select_offset(direction)
    }

    fn in_range(&self, needle: i32) -> bool {
        (i32::from(self.start)..=i32::from(self.stop)).contains(&needle)
    }

    fn update_line(&mut self) {
        if self.state != FirmwareState::Knitting || !self.line.ready {
            return;
        }
        let (Some(carriage), Some(direction)) = (self.carriage, self.direction) else {
            return;
        };
        let selected = self.selector(carriage, direction);
        if self.line.worked.is_none() && self.in_range(selected) {
            self.line.worked = Some(direction);
        }
        let finished = match self.line.worked {
            Some(Direction::Right) => selected > i32::from(self.stop),
            Some(Direction::Left) => selected < i32::from(self.start),
            None => false,
        };
        if finished {
            self.finish_line();
        }
    }

    fn finish_line(&mut self) {
        let done = self.line.index;
        self.line.ready = false;
        self.line.worked = None;
        self.beep();
        let toggled = !self.leds[1];
        self.set_led(1, toggled);
        if self.line.last {
            info!("firmware: pattern finished after line {done}");
            self.enter(FirmwareState::Ready);
            return;
        }
        self.line.index = done.wrapping_add(1);
        let request = protocol::req_line(self.line.index);
        self.send(&request);
        debug!("firmware: line {done} finished");
    }

    fn solenoid_register(&self) -> u16 {
        let idle = idle_register(self.machine);
        if self.state == FirmwareState::Test {
            return self.test_register;
        }
        if self.state != FirmwareState::Knitting || !self.line.ready {
            return idle;
        }
        let (Some(carriage), Some(direction)) = (self.carriage, self.direction) else {
            return idle;
        };
        let mapping = strategy(carriage);
        let belt = self.belt.unwrap_or_default();
        let n = i32::from(self.machine.solenoid_count());
        let selected = self.selector(carriage, direction);
        let window = match direction {
            Direction::Right => selected + 1..=selected + n,
            Direction::Left => selected - n..=selected - 1,
        };
        let mut register = idle;
        for needle in window {
            if !self.in_range(needle) {
                continue;
            }
            let knit = usize::try_from(needle).is_ok_and(|k| bitmap_bit(&self.line.bitmap, k));
            if knit {
                let index = mapping.armature_index(needle, direction, belt, self.machine);
                register &= !(1 << self.machine.register_bit(index));
            }
        }
        register
    }

    fn drive_solenoids(&mut self) {
        let value = self.solenoid_register();
        if self.register != Some(value) {
            self.register = Some(value);
            self.outbox.push_back(McuEvent::SolenoidWrite(value));
        }
    }
}

/// Register value with every solenoid released.
#[must_use]
pub const fn idle_register(machine: MachineFamily) -> u16 {
    match machine {
        MachineFamily::Kh910 | MachineFamily::Kh930 => 0xFFFF,
        MachineFamily::Kh270 => 0x0FFF << 3,
    }
}

impl SignalSink for ReferenceFirmware {
    fn raise(&mut self, line: Line, value: u16) {
        match line {
            Line::EncoderV1 => self.v1 = value != 0,
            Line::EncoderV2 => self.v2 = value != 0,
            Line::BeltPhase => self.belt_level = value != 0,
            Line::HallLeft => self.hall_left = value,
            Line::HallRight => self.hall_right = value,
        }
    }
}

impl Mcu for ReferenceFirmware {
    fn step(&mut self) -> McuState {
        self.cycle += CYCLES_PER_STEP;
        self.process_hall();
        self.decode_encoder();
        self.infer_belt_phase();
        self.update_line();
        self.drive_solenoids();
        self.outbox
            .push_back(McuEvent::AdcTrigger(ADC_CHANNEL_HALL_RIGHT));
        self.outbox
            .push_back(McuEvent::AdcTrigger(ADC_CHANNEL_HALL_LEFT));
        McuState::Running
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn cycles_to_usec(&self, cycles: u64) -> u64 {
        cycles * 1_000_000 / CLOCK_HZ
    }

    fn poll_event(&mut self) -> Option<McuEvent> {
        self.outbox.pop_front()
    }

    fn inject_serial(&mut self, byte: u8) {
        if let Some(frame) = self.rx.push(byte) {
            self.handle_frame(&frame);
        }
    }

    fn reset(&mut self) {
        let cycle = self.cycle;
        let (v1, v2, belt_level) = (self.v1, self.v2, self.belt_level);
        *self = Self::new(self.machine);
        self.cycle = cycle;
        self.v1 = v1;
        self.v2 = v2;
        self.belt_level = belt_level;
        self.sub_step = match (u8::from(v1) << 1) | u8::from(v2) {
            0 => 0,
            1 => 1,
            3 => 2,
            _ => 3,
        };
        info!("firmware: reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::codec::SLIP_END;

    fn drain_frames(fw: &mut ReferenceFirmware) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut rx = FrameAccumulator::new();
        while let Some(event) = fw.poll_event() {
            if let McuEvent::SerialOut(byte) = event {
                if let Some(frame) = rx.push(byte) {
                    frames.push(frame);
                }
            }
        }
        frames
    }

    fn inject(fw: &mut ReferenceFirmware, message: &[u8]) {
        for byte in encode_frame(message) {
            fw.inject_serial(byte);
        }
    }

    #[test]
    fn init_is_confirmed_with_state_indication() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        inject(&mut fw, &protocol::req_init(MachineFamily::Kh930));
        let frames = drain_frames(&mut fw);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], protocol::cnf_init(0));
        assert_eq!(frames[1][0], ApiCode::IndState.byte());
        assert_eq!(fw.state(), FirmwareState::Ready);
    }

    #[test]
    fn start_requests_the_first_line() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        inject(&mut fw, &protocol::req_init(MachineFamily::Kh930));
        drain_frames(&mut fw);
        inject(&mut fw, &protocol::req_start(0, 199, 0));
        let frames = drain_frames(&mut fw);
        assert_eq!(frames, vec![protocol::cnf_start(0), protocol::req_line(0)]);
        assert_eq!(fw.state(), FirmwareState::Knitting);
    }

    #[test]
    fn start_before_init_is_refused() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        inject(&mut fw, &protocol::req_start(0, 199, 0));
        assert_eq!(drain_frames(&mut fw), vec![protocol::cnf_start(1)]);
    }

    #[test]
    fn info_and_test_mode() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        inject(&mut fw, &protocol::req_info());
        inject(&mut fw, &protocol::req_test());
        inject(&mut fw, &protocol::stamp(&[ApiCode::SetAllCmd.byte(), 0x00, 0x0F]));
        let frames = drain_frames(&mut fw);
        assert_eq!(frames, vec![protocol::cnf_info(1, 0, 0), protocol::cnf_test(0)]);
        fw.step();
        let writes: Vec<McuEvent> = std::iter::from_fn(|| fw.poll_event())
            .filter(|e| matches!(e, McuEvent::SolenoidWrite(_)))
            .collect();
        assert_eq!(writes, vec![McuEvent::SolenoidWrite(0x000F)]);

        inject(&mut fw, &protocol::stamp(&[ApiCode::ReadEolSensorsCmd.byte()]));
        let frames = drain_frames(&mut fw);
        assert_eq!(frames[0][0], ApiCode::TestRes.byte());
        assert!(frames[0].starts_with(b"\xEEEOL L=1650 R=1650"));
        inject(&mut fw, &protocol::stamp(&[ApiCode::QuitCmd.byte()]));
        assert_eq!(fw.state(), FirmwareState::Ready);
    }

    #[test]
    fn corrupted_frames_are_dropped() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        let mut msg = protocol::req_init(MachineFamily::Kh930);
        msg[1] ^= 0x40;
        inject(&mut fw, &msg);
        assert!(drain_frames(&mut fw).is_empty());
        assert_eq!(fw.state(), FirmwareState::Idle);
    }

    #[test]
    fn every_step_samples_both_hall_sensors() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        assert_eq!(fw.step(), McuState::Running);
        let events: Vec<McuEvent> = std::iter::from_fn(|| fw.poll_event()).collect();
        assert_eq!(
            events,
            vec![
                McuEvent::SolenoidWrite(0xFFFF),
                McuEvent::AdcTrigger(ADC_CHANNEL_HALL_RIGHT),
                McuEvent::AdcTrigger(ADC_CHANNEL_HALL_LEFT),
            ]
        );
        assert_eq!(fw.cycles_to_usec(fw.cycle()), 2_500);
    }

    #[test]
    fn encoder_tracks_position_in_both_directions() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        for (v1, v2) in [(0, 1), (1, 1), (1, 0), (0, 0)] {
            fw.raise(Line::EncoderV1, v1);
            fw.raise(Line::EncoderV2, v2);
            fw.step();
        }
        assert_eq!(fw.position(), 1);
        fw.raise(Line::EncoderV1, 1);
        fw.raise(Line::EncoderV2, 0);
        fw.step();
        assert_eq!(fw.position(), 0);
    }

    #[rstest::rstest]
    #[case(MachineFamily::Kh930, 2200, 1650, CarriageFamily::Knit, 0)]
    #[case(MachineFamily::Kh930, 100, 1650, CarriageFamily::Lace, 0)]
    #[case(MachineFamily::Kh930, 1650, 100, CarriageFamily::Lace, 199)]
    #[case(MachineFamily::Kh910, 1650, 0, CarriageFamily::Knit, 199)]
    #[case(MachineFamily::Kh270, 2200, 1650, CarriageFamily::Knit270, -6)]
    fn first_magnet_detects_the_carriage(
        #[case] machine: MachineFamily,
        #[case] left: u16,
        #[case] right: u16,
        #[case] carriage: CarriageFamily,
        #[case] position: i32,
    ) {
        let mut fw = ReferenceFirmware::new(machine);
        fw.raise(Line::HallLeft, left);
        fw.raise(Line::HallRight, right);
        fw.step();
        assert_eq!(fw.carriage(), Some(carriage));
        assert_eq!(fw.position(), position);
    }

    #[test]
    fn south_then_north_is_a_garter_carriage() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        fw.raise(Line::HallLeft, 100);
        fw.raise(Line::HallRight, 1650);
        fw.step();
        assert_eq!(fw.carriage(), Some(CarriageFamily::Lace));
        fw.raise(Line::HallLeft, 2200);
        fw.step();
        assert_eq!(fw.carriage(), Some(CarriageFamily::Garter));
        assert_eq!(fw.position(), -10);
    }

    #[test]
    fn reset_returns_to_idle_and_keeps_time() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        inject(&mut fw, &protocol::req_init(MachineFamily::Kh930));
        fw.step();
        let cycle = fw.cycle();
        fw.reset();
        assert_eq!(fw.state(), FirmwareState::Idle);
        assert_eq!(fw.cycle(), cycle);
        assert!(fw.poll_event().is_none());
    }

    #[test]
    fn frames_are_slip_framed_on_the_wire() {
        let mut fw = ReferenceFirmware::new(MachineFamily::Kh930);
        inject(&mut fw, &protocol::req_info());
        let bytes: Vec<u8> = std::iter::from_fn(|| fw.poll_event())
            .filter_map(|e| match e {
                McuEvent::SerialOut(b) => Some(b),
                _ => None,
            })
            .collect();
        assert_eq!(bytes.first(), Some(&SLIP_END));
        assert_eq!(bytes.last(), Some(&SLIP_END));
        assert_eq!(decode(&bytes[1..bytes.len() - 1]), protocol::cnf_info(1, 0, 0));
    }
}
