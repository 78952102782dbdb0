//! Core crate for the knitting-machine shield simulator.

#[cfg(test)]
use env_logger as _;

/// SLIP framing and the CRC-8 message checksum.
pub mod codec;
pub use codec::{
    checksum8, decode, decode_into, encode, encode_frame, FrameAccumulator, FRAME_CAPACITY,
    SLIP_END, SLIP_ESC, SLIP_ESC_END, SLIP_ESC_ESC,
};

/// Fixed-width rolling histories for the status display.
pub mod trace;
pub use trace::{render_frame, FrameDirection, History, TraceLog};

/// Error taxonomy.
pub mod error;
pub use error::{ConfigError, ProtocolFault};

/// Machine, carriage and harness configuration.
pub mod config;
pub use config::{
    BeltPhase, CarriageFamily, Direction, HallBands, MachineConfig, MachineConfigBuilder,
    MachineFamily, StartSide, TestConfig, DEFAULT_LINE_DELAY_TICKS, DEFAULT_TEST_PATTERN,
    MARGIN_NEEDLES,
};

/// Bounded event queue between a front end and the simulation.
pub mod queue;
pub use queue::{event_queue, Event, EventConsumer, EventKind, EventProducer, QueueFull};

/// Contracts with the microcontroller under test.
pub mod signals;
pub use signals::{IdleMcu, Line, Mcu, McuEvent, McuState, SignalSink};

/// Per-carriage needle mapping strategies.
pub mod carriage;
pub use carriage::{strategy, HallReadings, NeedleMapping};

/// Electromechanical carriage, solenoid and needle model.
pub mod machine;
pub use machine::{Machine, SensorOutputs};

/// Command codes and message builders of the serial protocol.
pub mod protocol;
pub use protocol::{ApiCode, StateIndication};

/// Shield LEDs and beeper.
pub mod shield;
pub use shield::ShieldIndicators;

/// Automated knitting test driver.
pub mod harness;
pub use harness::{HarnessState, PatternMismatch, TestHarness, Verdict};

/// Behavioral model of the shield firmware.
pub mod firmware;
pub use firmware::{FirmwareState, ReferenceFirmware};

/// Simulation context and outer loop.
pub mod sim;
pub use sim::{Simulator, StepStatus};
