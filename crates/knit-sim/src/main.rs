//! CLI entry point for the shield simulator binary.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use knit_core::{
    BeltPhase, CarriageFamily, MachineConfig, MachineFamily, StartSide, StepStatus, TestConfig,
    DEFAULT_TEST_PATTERN,
};
use knit_sim::{exit_code, parse_script, replay, run_test, EXIT_FAIL, EXIT_FAULT, EXIT_PASS};
use log::LevelFilter;
#[cfg(test)]
use tempfile as _;
use thiserror as _;

const USAGE_TEXT: &str = "\
Usage: ayab-sim <command> [options]

Commands:
  test                 Knit a test pattern against the reference firmware
  replay <script>      Feed carriage events from a script and show the result

Options:
  --machine <KH910|KH930|KH270>   Machine family (default: KH910)
  --carriage <K|L|G>              Carriage family (default: K)
  --beltphase <Regular|Shifted>   Belt phase (default: Regular)
  --startside <Left|Right>        Side the carriage starts from (default: Left)
  --start <needle>                First pattern needle (default: 0)
  --stop <needle>                 Last pattern needle (default: last needle)
  --pattern <|.>                  Pattern sent to the firmware (test only)
  --expect <|.>                   Expected knitted needles (test only)
  --trace                         Log decoded protocol frames
  -v                              Raise log verbosity (repeatable)
  -h, --help                      Show this help message

Exit status: 0 pass, 1 failed test or bad arguments, 2 firmware protocol fault.

Examples:
  ayab-sim test --machine KH930 --carriage K --pattern '|.'
  ayab-sim replay sweep.txt --startside Right
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Test(SimArgs),
    Replay { script: PathBuf, args: SimArgs },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SimArgs {
    machine: MachineFamily,
    carriage: Option<CarriageFamily>,
    belt_phase: BeltPhase,
    start_side: StartSide,
    start: Option<u16>,
    stop: Option<u16>,
    pattern: Option<String>,
    expect: Option<String>,
    trace: bool,
    verbosity: u8,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "test" => {
            let (positional, sim) = parse_options(args)?;
            if let Some(extra) = positional.first() {
                return Err(format!("unexpected argument: {}", extra.display()));
            }
            Ok(ParseResult::Command(Command::Test(sim)))
        }
        "replay" => {
            let (mut positional, sim) = parse_options(args)?;
            if positional.len() > 1 {
                return Err("multiple script paths provided".to_string());
            }
            let script = positional
                .pop()
                .ok_or_else(|| "missing script path".to_string())?;
            Ok(ParseResult::Command(Command::Replay { script, args: sim }))
        }
        other => Err(format!("unknown command: {other}")),
    }
}

fn value<T: FromStr>(args: &mut impl Iterator<Item = OsString>, option: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    let raw = args
        .next()
        .ok_or_else(|| format!("missing value for {option}"))?;
    raw.to_string_lossy()
        .parse()
        .map_err(|e| format!("{option}: {e}"))
}

#[allow(clippy::while_let_on_iterator)]
fn parse_options(
    mut args: impl Iterator<Item = OsString>,
) -> Result<(Vec<PathBuf>, SimArgs), String> {
    let mut positional = Vec::new();
    let mut sim = SimArgs::default();

    while let Some(arg) = args.next() {
        let text = arg.to_string_lossy().into_owned();
        match text.as_str() {
            "--help" | "-h" => return Err(USAGE_TEXT.to_string()),
            "--machine" => sim.machine = value(&mut args, "--machine")?,
            "--carriage" => sim.carriage = Some(value(&mut args, "--carriage")?),
            "--beltphase" => sim.belt_phase = value(&mut args, "--beltphase")?,
            "--startside" => sim.start_side = value(&mut args, "--startside")?,
            "--start" => sim.start = Some(value(&mut args, "--start")?),
            "--stop" => sim.stop = Some(value(&mut args, "--stop")?),
            "--pattern" => sim.pattern = Some(value(&mut args, "--pattern")?),
            "--expect" => sim.expect = Some(value(&mut args, "--expect")?),
            "--trace" => sim.trace = true,
            "-v" => sim.verbosity = sim.verbosity.saturating_add(1),
            other if other.starts_with('-') => return Err(format!("unknown option: {other}")),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    Ok((positional, sim))
}

fn init_logging(args: &SimArgs) {
    let level = match (args.verbosity, args.trace) {
        (0, false) => LevelFilter::Warn,
        (0 | 1, _) => LevelFilter::Info,
        (2, _) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn machine_config(args: &SimArgs) -> Result<MachineConfig, i32> {
    let mut builder = MachineConfig::builder(args.machine)
        .belt_phase(args.belt_phase)
        .start_side(args.start_side);
    if let Some(carriage) = args.carriage {
        builder = builder.carriage(carriage);
    }
    if let Some(start) = args.start {
        builder = builder.start_needle(start);
    }
    if let Some(stop) = args.stop {
        builder = builder.stop_needle(stop);
    }
    builder.build().map_err(|e| {
        eprintln!("error: {e}");
        EXIT_FAIL
    })
}

fn test_config(args: &SimArgs) -> Result<TestConfig, i32> {
    let pattern = args.pattern.as_deref().unwrap_or(DEFAULT_TEST_PATTERN);
    let mut test = TestConfig::new(pattern);
    if let Some(expected) = &args.expect {
        test = test.and_then(|t| t.with_expected(expected));
    }
    test.map_err(|e| {
        eprintln!("error: {e}");
        EXIT_FAIL
    })
}

fn run_test_command(args: &SimArgs) -> Result<(), i32> {
    let config = machine_config(args)?;
    let test = test_config(args)?;
    let result = run_test(&config, test, args.trace);

    match &result {
        Ok(StepStatus::Finished(verdict)) => println!("{verdict}"),
        Ok(_) => println!("FAIL: test did not finish"),
        Err(fault) => eprintln!("error: protocol fault: {fault}"),
    }

    match exit_code(&result) {
        EXIT_PASS => Ok(()),
        code => Err(code),
    }
}

fn run_replay_command(script: &Path, args: &SimArgs) -> Result<(), i32> {
    let config = machine_config(args)?;
    let source = fs::read_to_string(script).map_err(|e| {
        eprintln!("error: failed to read {}: {e}", script.display());
        EXIT_FAIL
    })?;
    let events = parse_script(&source).map_err(|e| {
        eprintln!("{}: error: {e}", script.display());
        EXIT_FAIL
    })?;

    let sim = replay(&config, events, args.trace).map_err(|fault| {
        eprintln!("error: protocol fault: {fault}");
        EXIT_FAULT
    })?;
    println!("{}", sim.render_display());
    Ok(())
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(Command::Test(args))) => {
            init_logging(&args);
            match run_test_command(&args) {
                Ok(()) => 0,
                Err(code) => code,
            }
        }
        Ok(ParseResult::Command(Command::Replay { script, args })) => {
            init_logging(&args);
            match run_replay_command(&script, &args) {
                Ok(()) => 0,
                Err(code) => code,
            }
        }
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> impl Iterator<Item = OsString> {
        args.iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parses_test_command_with_options() {
        let result = parse_args(os(&[
            "test",
            "--machine",
            "kh270",
            "--startside",
            "Right",
            "--pattern",
            "||..",
            "-v",
            "-v",
        ]))
        .expect("valid test args should parse");

        let ParseResult::Command(Command::Test(args)) = result else {
            panic!("expected test command");
        };
        assert_eq!(args.machine, MachineFamily::Kh270);
        assert_eq!(args.start_side, StartSide::Right);
        assert_eq!(args.pattern.as_deref(), Some("||.."));
        assert_eq!(args.verbosity, 2);
        assert_eq!(args.carriage, None);
    }

    #[test]
    fn parses_replay_command() {
        let result = parse_args(os(&["replay", "moves.txt", "--trace"]))
            .expect("valid replay args should parse");
        let ParseResult::Command(Command::Replay { script, args }) = result else {
            panic!("expected replay command");
        };
        assert_eq!(script, PathBuf::from("moves.txt"));
        assert!(args.trace);
    }

    #[test]
    fn parses_help_flag() {
        let result = parse_args(os(&["-h"])).expect("help should parse without error");
        assert!(matches!(result, ParseResult::Help));
    }

    #[test]
    fn rejects_bad_values_and_unknown_options() {
        let error = parse_args(os(&["test", "--machine", "KH999"])).unwrap_err();
        assert!(error.contains("--machine"));
        assert!(error.contains("KH999"));

        let error = parse_args(os(&["test", "--fast"])).unwrap_err();
        assert!(error.contains("unknown option"));

        let error = parse_args(os(&["test", "--start"])).unwrap_err();
        assert!(error.contains("missing value for --start"));

        let error = parse_args(os(&["replay"])).unwrap_err();
        assert!(error.contains("missing script path"));

        let error = parse_args(os(&["weave"])).unwrap_err();
        assert!(error.contains("unknown command"));
    }

    #[test]
    fn carriage_must_fit_the_machine() {
        let args = SimArgs {
            machine: MachineFamily::Kh270,
            carriage: Some(CarriageFamily::Lace),
            ..SimArgs::default()
        };
        assert_eq!(machine_config(&args), Err(EXIT_FAIL));
    }
}
