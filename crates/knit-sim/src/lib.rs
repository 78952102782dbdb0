//! Command-line driver for the knitting-machine shield simulator.

use env_logger as _;
#[cfg(test)]
use tempfile as _;

/// Replay script parsing.
pub mod script;
pub use script::{parse_script, ScriptError};

/// Test and replay runs, and their exit statuses.
pub mod session;
pub use session::{exit_code, replay, run_test, EXIT_FAIL, EXIT_FAULT, EXIT_PASS};
