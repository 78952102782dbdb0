//! Carriage model driven through the simulator without firmware.

use knit_core::carriage::HALL_IDLE;
use knit_core::{
    event_queue, BeltPhase, CarriageFamily, Direction, EventKind, EventProducer, IdleMcu,
    Machine, MachineConfig, MachineFamily, Simulator, StartSide, MARGIN_NEEDLES,
};
use log as _;
use proptest::prelude::*;
use ringbuf as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

fn knit_kh930() -> MachineConfig {
    MachineConfig::builder(MachineFamily::Kh930)
        .carriage(CarriageFamily::Knit)
        .start_side(StartSide::Left)
        .belt_phase(BeltPhase::Regular)
        .build()
        .unwrap()
}

fn drive_right(sim: &mut Simulator<IdleMcu>, producer: &mut EventProducer, events: u32) {
    let mut pushed = 0;
    let start = sim.ticks();
    while sim.ticks() - start < u64::from(events) {
        if pushed < events && !producer.is_full() {
            producer.push(EventKind::MoveRight).unwrap();
            pushed += 1;
        }
        sim.step().unwrap();
    }
}

#[test]
fn two_hundred_events_advance_fifty_needles() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut producer, consumer) = event_queue();
    let mut sim = Simulator::new(&knit_kh930(), IdleMcu::new(), consumer);
    drive_right(&mut sim, &mut producer, 200);

    let machine = sim.machine();
    assert_eq!(machine.position(), -24 + 50);
    assert_eq!(machine.phase(), 200 % 64);
    assert_eq!(machine.selected_needle(), 2);
    assert_eq!(&machine.needles()[..4], b"|||.");
}

#[test]
fn sweep_to_the_right_rail_selects_every_needle() {
    let (mut producer, consumer) = event_queue();
    let mut sim = Simulator::new(&knit_kh930(), IdleMcu::new(), consumer);
    let mut steps = 0u32;
    while !sim.machine().at_rail(Direction::Right) {
        if !producer.is_full() {
            producer.push(EventKind::MoveRight).unwrap();
        }
        sim.step().unwrap();
        steps += 1;
        assert!(steps < 100_000, "carriage never reached the rail");
    }
    assert_eq!(sim.machine().position(), 200 + MARGIN_NEEDLES - 1);
    assert!(sim.machine().needles().iter().all(|&needle| needle == b'|'));
}

#[test]
fn armature_holds_until_the_disengage_window() {
    let mut machine = Machine::new(&knit_kh930());
    machine.set_solenoid_register(0xFFFF);
    machine.apply(Direction::Right);

    // Bit 0 is far from its cam peak here; dropping its command changes nothing.
    machine.set_solenoid_register(0xFFFE);
    while machine.phase() < 25 {
        machine.apply(Direction::Right);
        assert_eq!(machine.armature() & 1, 1, "phase {}", machine.phase());
    }
    machine.apply(Direction::Right);
    assert_eq!(machine.phase(), 26);
    assert_eq!(machine.armature() & 1, 0);
}

#[rstest]
#[case(MachineFamily::Kh910, CarriageFamily::Knit)]
#[case(MachineFamily::Kh930, CarriageFamily::Lace)]
#[case(MachineFamily::Kh930, CarriageFamily::Garter)]
#[case(MachineFamily::Kh270, CarriageFamily::Knit270)]
fn full_sweep_passes_both_hall_sensors(
    #[case] family: MachineFamily,
    #[case] carriage: CarriageFamily,
) {
    let config = MachineConfig::builder(family)
        .carriage(carriage)
        .build()
        .unwrap();
    let mut machine = Machine::new(&config);
    let (mut left_seen, mut right_seen) = (false, false);
    while !machine.at_rail(Direction::Right) {
        machine.apply(Direction::Right);
        let hall = machine.hall();
        left_seen |= hall.left != HALL_IDLE;
        right_seen |= hall.right != HALL_IDLE;
    }
    assert!(left_seen && right_seen);
}

proptest! {
    #[test]
    fn queued_moves_never_push_the_carriage_off_the_rails(
        moves in proptest::collection::vec(any::<bool>(), 0..400),
        family in prop::sample::select(vec![MachineFamily::Kh910, MachineFamily::Kh930, MachineFamily::Kh270]),
    ) {
        let config = MachineConfig::builder(family).build().unwrap();
        let needles = i32::from(config.needle_count());
        let span = 4 * u32::from(config.solenoid_count());
        let (mut producer, consumer) = event_queue();
        let mut sim = Simulator::new(&config, IdleMcu::new(), consumer);
        for right in moves {
            let kind = if right { EventKind::MoveRight } else { EventKind::MoveLeft };
            producer.push(kind).unwrap();
            for _ in 0..5 {
                sim.step().unwrap();
            }
            let position = sim.machine().position();
            prop_assert!((-MARGIN_NEEDLES..=needles - 1 + MARGIN_NEEDLES).contains(&position));
            prop_assert!(sim.machine().phase() < span);
        }
    }
}
