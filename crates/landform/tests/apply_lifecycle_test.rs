mod common;

use common::{NETWORK, TestProject};
use predicates::prelude::*;

#[test]
fn test_apply_plan_destroy_lifecycle() {
    let project = TestProject::new();
    project.write_declaration(NETWORK);

    project
        .landform()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 to create"))
        .stdout(predicate::str::contains("3 applied, 0 failed, 0 skipped"));

    let objects = project.cloud_objects();
    assert_eq!(objects["objects"].as_object().unwrap().len(), 3);

    // 2回目は変更なし
    project
        .landform()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));

    project
        .landform()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vpc.main"))
        .stdout(predicate::str::contains("subnet.public"))
        .stdout(predicate::str::contains("security_group.game"));

    project
        .landform()
        .args(["state", "show", "vpc.main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.0.0/16"))
        .stdout(predicate::str::contains("main-vpc"));

    project
        .landform()
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 to destroy"));

    let objects = project.cloud_objects();
    assert!(objects["objects"].as_object().unwrap().is_empty());

    project
        .landform()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No resources in state"));
}

#[test]
fn test_variable_override_replaces_network() {
    let project = TestProject::new();
    project.write_declaration(NETWORK);
    project.landform().args(["apply", "--yes"]).assert().success();

    project
        .landform()
        .args(["apply", "--yes", "--var", "vpc_cidr=10.1.0.0/16"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 to replace"))
        .stdout(predicate::str::contains("cidr_block (forces replacement)"));

    project
        .landform()
        .args(["state", "show", "vpc.main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.1.0.0/16"));

    let objects = project.cloud_objects();
    assert_eq!(objects["objects"].as_object().unwrap().len(), 3);
}

#[test]
fn test_moving_route_table_replaces_its_association() {
    let project = TestProject::new();
    project.write_declaration(
        r#"
project "routing"

variables {
    rt_vpc "a"
}

resource "vpc" "a" {
    cidr_block "10.0.0.0/16"
}

resource "vpc" "b" {
    cidr_block "10.1.0.0/16"
}

resource "subnet" "s" {
    vpc_id "${vpc.a.id}"
    cidr_block "10.0.1.0/24"
}

resource "route_table" "rt" {
    vpc_id "${vpc.{{ rt_vpc }}.id}"
}

resource "route_table_association" "x" {
    subnet_id "${subnet.s.id}"
    route_table_id "${route_table.rt.id}"
}
"#,
    );
    project.landform().args(["apply", "--yes"]).assert().success();

    project
        .landform()
        .args(["apply", "--yes", "--var", "rt_vpc=b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 to replace"))
        .stdout(predicate::str::contains("0 failed, 0 skipped"));

    let objects = project.cloud_objects();
    assert_eq!(objects["objects"].as_object().unwrap().len(), 5);
}

#[test]
fn test_declined_apply_releases_lock() {
    let project = TestProject::new();
    project.write_declaration(NETWORK);

    project
        .landform()
        .arg("apply")
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Apply these changes? [y/N]"))
        .stdout(predicate::str::contains("Cancelled."));

    assert!(!project.state_dir().join("lock.json").exists());
    project
        .landform()
        .args(["apply", "--yes", "--lock-timeout", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 applied, 0 failed, 0 skipped"));
}

#[test]
fn test_removed_resource_is_destroyed() {
    let project = TestProject::new();
    project.write_declaration(NETWORK);
    project.landform().args(["apply", "--yes"]).assert().success();

    project.write_declaration(&NETWORK.replace(
        r#"resource "security_group" "game" {
    name "game"
    vpc_id "${vpc.main.id}"
}"#,
        "",
    ));

    project
        .landform()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 to destroy"));

    project
        .landform()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("security_group.game").not());
}

#[test]
fn test_disabled_resource_is_destroyed() {
    let project = TestProject::new();
    project.write_declaration(NETWORK);
    project.landform().args(["apply", "--yes"]).assert().success();

    project.write_declaration(&NETWORK.replace(
        r#"resource "security_group" "game" {"#,
        r#"resource "security_group" "game" enabled=#false {"#,
    ));

    project
        .landform()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 to destroy"));
}

#[test]
fn test_failure_is_contained_and_exits_nonzero() {
    let project = TestProject::new();
    project.write_declaration(&format!(
        r#"{NETWORK}
resource "instance" "game" {{
    instance_type "t3.micro"
    subnet_id "${{subnet.public.id}}"
}}

resource "s3_bucket" "state" {{
    bucket "game-infra-state"
}}
"#
    ));

    project
        .landform()
        .args(["apply", "--yes"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("instance.game"))
        .stdout(predicate::str::contains("missing required attribute 'ami'"))
        .stdout(predicate::str::contains("4 applied, 1 failed, 0 skipped"));

    project
        .landform()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("s3_bucket.state"))
        .stdout(predicate::str::contains("instance.game").not());

    // 失敗したリソースは再度プランされる
    project
        .landform()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 to create"));
}

#[test]
fn test_lock_held_by_another_run_times_out() {
    let project = TestProject::new();
    project.write_declaration(NETWORK);

    let lock = serde_json::json!({
        "token": "abc123",
        "holder": "someone@elsewhere",
        "pid": 1,
        "acquired_at": chrono::Utc::now().to_rfc3339(),
    });
    std::fs::create_dir_all(project.state_dir()).unwrap();
    std::fs::write(project.state_dir().join("lock.json"), lock.to_string()).unwrap();

    project
        .landform()
        .args(["plan", "--lock-timeout", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("abc123"));

    project
        .landform()
        .args(["force-unlock", "abc123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("someone@elsewhere"));

    project.landform().arg("plan").assert().success();
}
