//! Integration tests for the ayab-sim CLI.

use env_logger as _;
use knit_core as _;
use knit_sim as _;
use log as _;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use thiserror as _;

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.join("ayab-sim")
}

fn run(args: &[&str]) -> Output {
    Command::new(binary_path())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run ayab-sim")
}

#[test]
fn alternating_pattern_passes() {
    let output = run(&["test", "--pattern", "|.", "--start", "0", "--stop", "199"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("PASS"), "stdout: {stdout}");
}

#[test]
fn corrupted_expectation_fails_naming_the_needle() {
    let mut expected: Vec<u8> = b"|.".iter().copied().cycle().take(200).collect();
    expected[57] = b'|';
    let expected = String::from_utf8(expected).unwrap();

    let output = run(&["test", "--pattern", "|.", "--expect", &expected]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mismatch at needle 57"), "stdout: {stdout}");
}

#[test]
fn unknown_machine_is_a_usage_error() {
    let output = run(&["test", "--machine", "KH999"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown machine family `KH999`"));
}

#[test]
fn unsupported_carriage_is_a_configuration_error() {
    let output = run(&["test", "--machine", "KH270", "--carriage", "L"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not supported"));
}

#[test]
fn kh910_lace_cannot_start_on_the_right() {
    let output = run(&[
        "test",
        "--machine",
        "KH910",
        "--carriage",
        "L",
        "--startside",
        "Right",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot start on the Right"), "stderr: {stderr}");
}

#[test]
fn replay_prints_the_needle_bed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let script = temp_dir.path().join("sweep.txt");
    fs::write(&script, "# sweep a little\nright 40\ntrace\nleft 4\n").unwrap();

    let output = run(&["replay", script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("S=["));
    assert!(stdout.contains("LEDs="));
    assert!(stdout.contains("<- "));
}

#[test]
fn malformed_script_reports_the_line() {
    let temp_dir = tempfile::tempdir().unwrap();
    let script = temp_dir.path().join("bad.txt");
    fs::write(&script, "right 4\nhop 2\n").unwrap();

    let output = run(&["replay", script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 2: unknown command `hop`"));
}

#[test]
fn missing_command_prints_usage() {
    let output = run(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage: ayab-sim"));
}
