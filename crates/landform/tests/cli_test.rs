#![allow(deprecated)] // TODO: migrate Command::cargo_bin to cargo_bin_cmd!

mod common;

use assert_cmd::Command;
use common::{NETWORK, TestProject};
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("landform").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("force-unlock"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("landform").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("landform"));
}

#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("landform").unwrap();
    cmd.arg("apply")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--refresh"))
        .stdout(predicate::str::contains("--var"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("landform").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_validate_without_declaration() {
    let project = TestProject::new();
    project
        .landform()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Declaration file not found"));
}

#[test]
fn test_validate_lists_resources() {
    let project = TestProject::new();
    project.write_declaration(NETWORK);
    project
        .landform()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("game-infra"))
        .stdout(predicate::str::contains("subnet.public (after vpc.main)"));
}

#[test]
fn test_validate_rejects_cycle() {
    let project = TestProject::new();
    project.write_declaration(
        r#"
resource "vpc" "a" {
    peer "${vpc.b.id}"
}

resource "vpc" "b" {
    peer "${vpc.a.id}"
}
"#,
    );
    project
        .landform()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("dependency cycle detected"));
}

#[test]
fn test_validate_rejects_unresolved_reference() {
    let project = TestProject::new();
    project.write_declaration(
        r#"
resource "subnet" "public" {
    vpc_id "${vpc.missing.id}"
    cidr_block "10.0.1.0/24"
}
"#,
    );
    project
        .landform()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("vpc.missing"));
}

#[test]
fn test_plan_is_read_only() {
    let project = TestProject::new();
    project.write_declaration(NETWORK);
    project
        .landform()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 to create"));

    assert!(!project.path().join(".landform/cloud/objects.json").exists());
    assert!(!project.state_dir().join("lock.json").exists());
}

#[test]
fn test_force_unlock_without_lock_fails() {
    let project = TestProject::new();
    project.write_declaration(NETWORK);
    project
        .landform()
        .args(["force-unlock", "deadbeef"])
        .assert()
        .failure();
}

#[test]
fn test_unknown_provider_is_rejected() {
    let project = TestProject::new();
    project.write_declaration(
        r#"
provider "mystery" {
    region "nowhere"
}

resource "vpc" "main" {
    cidr_block "10.0.0.0/16"
}
"#,
    );
    project
        .landform()
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown provider 'mystery'"));
}
