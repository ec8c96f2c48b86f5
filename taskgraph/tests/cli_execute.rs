//! CLI tests for the `taskgraph` binary.
//!
//! Spawns the binary and verifies exit codes match the pass outcome.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use taskgraph::exit_codes;
use taskgraph::io::init::{InitOptions, TaskgraphPaths, init_taskgraph};

fn taskgraph(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskgraph"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("taskgraph")
}

fn write_plan(root: &Path, contents: &str) {
    fs::write(root.join("plan.json"), contents).expect("write plan");
}

#[test]
fn execute_completed_plan_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_taskgraph(temp.path(), &InitOptions { force: false }).expect("init");
    write_plan(
        temp.path(),
        r#"{"actions": [{"type": "create_directory", "params": {"path": "out"}}]}"#,
    );

    let output = taskgraph(temp.path(), &["execute", "plan.json", "--out", "done.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(report["outcome"], "completed");
    assert!(temp.path().join("out").is_dir());
    let saved = fs::read_to_string(temp.path().join("done.json")).expect("saved plan");
    assert!(saved.contains("\"status\": \"completed\""));
}

#[test]
fn execute_blocked_plan_exits_blocked() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plan(
        temp.path(),
        r#"{"actions": [{"type": "create_directory", "params": {"path": "x"}, "dependencies": ["nope"]}]}"#,
    );

    let output = taskgraph(temp.path(), &["execute", "plan.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::BLOCKED));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(report["outcome"], "blocked");
}

#[test]
fn execute_failed_validation_exits_failed() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plan(
        temp.path(),
        r#"{"actions": [{
            "type": "run_command",
            "params": {"command": "true"},
            "validation": {"type": "file_exists", "criteria": "missing.txt"}
        }]}"#,
    );

    let output = taskgraph(temp.path(), &["execute", "plan.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(report["outcome"], "failed");
}

#[test]
fn execute_rejects_unknown_action_type() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plan(
        temp.path(),
        r#"{"actions": [{"type": "teleport", "params": {}}]}"#,
    );

    let output = taskgraph(temp.path(), &["execute", "plan.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown action type 'teleport'"), "{stderr}");
}

#[test]
fn check_reports_cycles_as_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plan(
        temp.path(),
        r#"{"actions": [
            {"key": "a", "type": "run_command", "params": {"command": "true"}, "dependencies": ["b"]},
            {"key": "b", "type": "run_command", "params": {"command": "true"}, "dependencies": ["a"]}
        ]}"#,
    );

    let output = taskgraph(temp.path(), &["check", "plan.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("dependency cycle"), "{stderr}");
}

#[test]
fn classify_prints_recommendation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = taskgraph(
        temp.path(),
        &["classify", "ModuleNotFoundError: No module named 'flask'"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "install_module:flask"
    );
}

#[test]
fn run_from_plan_file_writes_final_plan() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_taskgraph(temp.path(), &InitOptions { force: false }).expect("init");
    write_plan(
        temp.path(),
        r#"{"actions": [{"type": "create_file", "params": {"path": "hello.txt", "content": "hi"}}]}"#,
    );

    let output = taskgraph(temp.path(), &["run", "say hi", "--plan", "plan.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(temp.path().join("hello.txt")).expect("file"),
        "hi"
    );
    let runs: Vec<_> = fs::read_dir(&paths.runs_dir)
        .expect("runs dir")
        .collect::<Result<_, _>>()
        .expect("entries");
    assert_eq!(runs.len(), 1);
    assert_eq!(paths.runs_dir, TaskgraphPaths::new(temp.path()).runs_dir);
}

#[test]
fn run_reports_plan_status_when_nothing_is_left_to_remediate() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_taskgraph(temp.path(), &InitOptions { force: false }).expect("init");
    write_plan(
        temp.path(),
        r#"{"actions": [{"type": "run_command", "params": {"command": "exit 3"}}]}"#,
    );

    let output = taskgraph(temp.path(), &["run", "quietly fail", "--plan", "plan.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(status failed)"), "{stdout}");
    assert!(stdout.contains("nothing to remediate; plan status failed"), "{stdout}");
}

#[test]
fn run_without_oracle_or_plan_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = taskgraph(temp.path(), &["run", "anything"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no oracle configured"), "{stderr}");
}
