use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const INVENTORY: &str = "\
organizations:
  1: acme
  2: globex
clusters:
  - id: 1
    org_id: 1
    name: eu-west
    cloud: amazon
    distribution: eks
    status: RUNNING
    kubeconfig: eu-west
  - id: 2
    org_id: 1
    name: us-east
    cloud: google
    distribution: gke
    status: RUNNING
    kubeconfig: us-east
  - id: 3
    org_id: 1
    name: staging
    cloud: amazon
    distribution: eks
    status: CREATING
    kubeconfig: staging
  - id: 4
    org_id: 2
    name: globex-main
    cloud: azure
    distribution: aks
    status: RUNNING
";

fn flotilla_home() -> TempDir {
    let home = TempDir::new().expect("home");
    let root = home.path().join(".flotilla");
    fs::create_dir_all(&root).expect("mkdir");
    fs::write(root.join("clusters.yaml"), INVENTORY).expect("write inventory");
    // Any attempt to reach a cluster fails fast instead of shelling out to a real helm.
    fs::write(
        root.join("config.yaml"),
        "helm:\n  binary: /nonexistent/helm\nfanout:\n  per_cluster_timeout_secs: 5\n",
    )
    .expect("write config");
    home
}

fn flotilla_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("flotilla"));
    cmd.env("FLOTILLA_HOME", home).env_remove("RUST_LOG");
    cmd
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let assert = cmd.assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    serde_json::from_str(&stdout).expect("parse json output")
}

#[test]
fn group_lifecycle_round_trip() {
    let home = flotilla_home();

    flotilla_cmd(home.path())
        .args(["group", "create", "edge", "--cluster", "eu-west", "--cluster", "2"])
        .assert()
        .success()
        .stdout(contains("Created cluster group 'edge'"));

    let groups = json_stdout(flotilla_cmd(home.path()).args(["group", "list", "--json"]));
    let groups = groups.as_array().expect("group array");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["name"], "edge");
    let members: Vec<&str> = groups[0]["members"]
        .as_array()
        .expect("members")
        .iter()
        .map(|m| m["name"].as_str().expect("name"))
        .collect();
    assert_eq!(members, ["eu-west", "us-east"]);
    assert_eq!(groups[0]["enabled_features"], serde_json::json!(["deployment"]));

    flotilla_cmd(home.path())
        .args(["group", "get", "edge"])
        .assert()
        .success()
        .stdout(contains("eu-west"))
        .stdout(contains("deployment"));

    flotilla_cmd(home.path())
        .args(["group", "delete", "edge"])
        .assert()
        .success();

    let groups = json_stdout(flotilla_cmd(home.path()).args(["group", "list", "--json"]));
    assert_eq!(groups, serde_json::json!([]));
}

#[test]
fn cluster_cannot_join_two_groups() {
    let home = flotilla_home();
    flotilla_cmd(home.path())
        .args(["group", "create", "a", "-c", "eu-west"])
        .assert()
        .success();

    flotilla_cmd(home.path())
        .args(["group", "create", "b", "-c", "eu-west"])
        .assert()
        .failure()
        .stderr(contains("failed to create cluster group 'b'"))
        .stderr(contains("already a member of cluster group"));
}

#[test]
fn unschedulable_cluster_is_refused() {
    let home = flotilla_home();
    flotilla_cmd(home.path())
        .args(["group", "create", "stage", "-c", "staging"])
        .assert()
        .failure()
        .stderr(contains("failed to create cluster group 'stage'"))
        .stderr(contains("cannot join a cluster group while CREATING"));
}

#[test]
fn cluster_list_shows_group_membership_for_the_org() {
    let home = flotilla_home();
    flotilla_cmd(home.path())
        .args(["group", "create", "edge", "-c", "us-east"])
        .assert()
        .success();

    let clusters = json_stdout(flotilla_cmd(home.path()).args(["cluster", "list", "--json"]));
    let clusters = clusters.as_array().expect("cluster array");
    assert_eq!(clusters.len(), 3, "only organization 1 is listed");
    let us_east = clusters
        .iter()
        .find(|c| c["name"] == "us-east")
        .expect("us-east listed");
    assert_eq!(us_east["group"], "edge");
    assert_eq!(us_east["status"], "RUNNING");

    let other_org = json_stdout(
        flotilla_cmd(home.path()).args(["cluster", "list", "--json", "--org", "2"]),
    );
    assert_eq!(other_org.as_array().expect("array").len(), 1);
}

#[test]
fn feature_status_without_deployments_is_ready() {
    let home = flotilla_home();
    flotilla_cmd(home.path())
        .args(["group", "create", "edge", "-c", "eu-west", "-c", "us-east"])
        .assert()
        .success();

    let status = json_stdout(
        flotilla_cmd(home.path()).args(["feature", "status", "edge", "deployment", "--json"]),
    );
    assert_eq!(
        status,
        serde_json::json!({ "eu-west": "READY", "us-east": "READY" })
    );

    let features = json_stdout(flotilla_cmd(home.path()).args(["feature", "list", "edge", "--json"]));
    assert_eq!(features[0]["name"], "deployment");
    assert_eq!(features[0]["enabled"], true);

    flotilla_cmd(home.path())
        .args(["feature", "update", "edge", "deployment", "--properties", r#"{"x":1}"#])
        .assert()
        .failure()
        .stderr(contains("takes no properties"));
}

#[test]
fn deployment_create_surfaces_installer_errors() {
    let home = flotilla_home();
    flotilla_cmd(home.path())
        .args(["group", "create", "edge", "-c", "eu-west"])
        .assert()
        .success();

    flotilla_cmd(home.path())
        .args(["deployment", "create", "edge", "web", "--chart", "stable/nginx"])
        .assert()
        .failure()
        .stderr(contains("failed to create deployment 'web'"));

    let deployments = json_stdout(flotilla_cmd(home.path()).args(["deployment", "list", "edge", "--json"]));
    assert_eq!(deployments, serde_json::json!([]));
}

#[test]
fn missing_group_is_reported() {
    let home = flotilla_home();
    flotilla_cmd(home.path())
        .args(["group", "get", "nope"])
        .assert()
        .failure()
        .stderr(contains("cluster group 'nope' not found"));
}
