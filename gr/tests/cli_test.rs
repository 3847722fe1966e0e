//! CLI smoke tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_plan_prints_classification_and_steps() {
    Command::cargo_bin("gr")
        .unwrap()
        .args(["plan", "compare prices for headphones on two shops and extract both"])
        .assert()
        .success()
        .stdout(predicate::str::contains("RESEARCH"))
        .stdout(predicate::str::contains("implied steps"));
}

#[test]
fn test_plan_json_output() {
    Command::cargo_bin("gr")
        .unwrap()
        .args(["plan", "google.com", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"classification\""))
        .stdout(predicate::str::contains("\"NAVIGATE\""));
}

#[test]
fn test_config_prints_resolved_settings() {
    Command::cargo_bin("gr")
        .unwrap()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("session-count"));
}

#[test]
fn test_unknown_subcommand_fails() {
    Command::cargo_bin("gr").unwrap().arg("frobnicate").assert().failure();
}
