//! Simulator runs started from the command line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use knit_core::{
    event_queue, Event, EventKind, MachineConfig, ProtocolFault, QueueFull, ReferenceFirmware,
    Simulator, StepStatus, TestConfig,
};
use log::{info, warn};

/// Steps allowed for a harness run before it is abandoned.
pub const TEST_STEP_LIMIT: u64 = 2_000_000;

/// Exit status for a passing run.
pub const EXIT_PASS: i32 = 0;
/// Exit status for a failed test, bad configuration or usage error.
pub const EXIT_FAIL: i32 = 1;
/// Exit status for a protocol fault in the simulated firmware.
pub const EXIT_FAULT: i32 = 2;

/// Runs the automated knitting test against the reference firmware.
///
/// # Errors
///
/// Returns the [`ProtocolFault`] that stopped the run.
pub fn run_test(
    config: &MachineConfig,
    test: TestConfig,
    tracing: bool,
) -> Result<StepStatus, ProtocolFault> {
    let (_producer, consumer) = event_queue();
    let firmware = ReferenceFirmware::new(config.machine());
    let mut sim = Simulator::new(config, firmware, consumer).with_harness(test);
    sim.set_tracing(tracing);
    let status = sim.run(TEST_STEP_LIMIT)?;
    info!(
        "test run stopped after {} ticks ({} ms emulated)",
        sim.ticks(),
        sim.now_usec() / 1000
    );
    Ok(status)
}

/// Maps the result of a run to a process exit status.
#[must_use]
pub fn exit_code(result: &Result<StepStatus, ProtocolFault>) -> i32 {
    match result {
        Ok(StepStatus::Finished(verdict)) if verdict.is_pass() => EXIT_PASS,
        Ok(_) => EXIT_FAIL,
        Err(_) => EXIT_FAULT,
    }
}

/// Feeds `events` through the event queue from a producer thread while the
/// simulator consumes them, and returns the simulator once every event has
/// been applied.
///
/// # Errors
///
/// Returns the [`ProtocolFault`] that stopped the run.
pub fn replay(
    config: &MachineConfig,
    events: Vec<EventKind>,
    tracing: bool,
) -> Result<Simulator<ReferenceFirmware>, ProtocolFault> {
    let (mut producer, consumer) = event_queue();
    let mut sim = Simulator::new(config, ReferenceFirmware::new(config.machine()), consumer);
    sim.set_tracing(tracing);

    let cancelled = Arc::new(AtomicBool::new(false));
    let feeder = {
        let cancelled = Arc::clone(&cancelled);
        thread::spawn(move || {
            for kind in events {
                let mut event = Event::from(kind);
                while let Err(QueueFull(rejected)) = producer.push(event) {
                    if cancelled.load(Ordering::Relaxed) {
                        return;
                    }
                    event = rejected;
                    thread::yield_now();
                }
            }
        })
    };

    let result = drive(&mut sim, &feeder);
    cancelled.store(true, Ordering::Relaxed);
    if feeder.join().is_err() {
        warn!("replay producer thread panicked");
    }
    result.map(|()| sim)
}

fn drive(
    sim: &mut Simulator<ReferenceFirmware>,
    feeder: &thread::JoinHandle<()>,
) -> Result<(), ProtocolFault> {
    while !feeder.is_finished() || sim.pending_events() > 0 {
        if sim.step()? == StepStatus::Halted {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use knit_core::{MachineFamily, Verdict};

    #[test]
    fn exit_codes() {
        let pass = Ok(StepStatus::Finished(Verdict::Passed { rows: 2 }));
        let stall = Ok(StepStatus::Finished(Verdict::Stalled { reversals: 7 }));
        let fault = Err(ProtocolFault::TruncatedFrame { len: 1 });
        assert_eq!(exit_code(&pass), EXIT_PASS);
        assert_eq!(exit_code(&stall), EXIT_FAIL);
        assert_eq!(exit_code(&Ok(StepStatus::Running)), EXIT_FAIL);
        assert_eq!(exit_code(&fault), EXIT_FAULT);
    }

    #[test]
    fn replay_applies_every_event() {
        let config = MachineConfig::builder(MachineFamily::Kh930).build().unwrap();
        let events = vec![EventKind::MoveRight; 100];
        let sim = replay(&config, events, false).unwrap();
        assert_eq!(sim.machine().phase(), 100 % 64);
        assert_eq!(sim.machine().position(), -24 + 25);
    }

    #[test]
    fn replayed_carriage_is_detected_by_the_firmware() {
        let config = MachineConfig::builder(MachineFamily::Kh930).build().unwrap();
        let sim = replay(&config, vec![EventKind::MoveRight; 4 * 30], false).unwrap();
        assert_eq!(
            sim.mcu().carriage(),
            Some(knit_core::CarriageFamily::Knit)
        );
        assert_eq!(sim.mcu().position(), sim.machine().position());
    }
}
