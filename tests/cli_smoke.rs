use std::process::Command;

use assert_cmd::prelude::*;
use serde_json::Value;

fn agentsim() -> Command {
    let mut cmd = Command::cargo_bin("agentsim").expect("binary built");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn list_shows_builtin_scenarios() {
    let assert = agentsim().arg("list").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    for id in [
        "flight_customer_service_with_medical_bag",
        "gmail_browser",
        "gmail_test_scenario",
    ] {
        assert!(stdout.contains(id), "missing {id} in:\n{stdout}");
    }
}

#[test]
fn json_run_reports_a_passing_verdict() {
    let assert = agentsim()
        .args(["--output", "json", "run", "gmail_test_scenario", "--strict"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    let value: Value = serde_json::from_str(stdout.trim()).expect("valid json");
    assert_eq!(value["scenario"].as_str(), Some("gmail_test_scenario"));
    assert_eq!(value["validation"]["verdict"].as_bool(), Some(true));
    assert_eq!(value["report"]["status"].as_str(), Some("completed"));
}

#[test]
fn unknown_scenario_fails() {
    agentsim()
        .args(["run", "no_such_scenario"])
        .assert()
        .failure();
}

#[test]
fn config_get_reads_dotted_keys() {
    let assert = agentsim()
        .args(["config", "get", "scheduler.max_concurrency"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    assert_eq!(stdout.trim(), "8");
}
