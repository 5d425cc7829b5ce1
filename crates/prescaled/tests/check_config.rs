//! `prescaled check-config` against real files.

use std::process::Command;

const VALID: &str = r#"
[workload]
namespace = "shop"
deployment = "webapp"
container = "app"

[prometheus]
url = "http://prometheus.monitoring:9090"

[metrics]
source = "requests_per_second"
target_value = 40.0
breach_tolerance = 5.0
min_train_history_hours = 2
max_train_history_hours = 24
[metrics.params]
cluster_name = "webapp_cluster"

[strategy]
proactive_enabled = true
eval_interval_secs = 60
min_instances = 2
max_instances = 20
downscale_cooldown_mins = 5
downscale_after_proactive_scaleup_cooldown_mins = 15
preempt_horizon_mins = 5
"#;

fn check_config(contents: &str) -> std::process::Output {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prescale.toml");
    std::fs::write(&path, contents).unwrap();

    Command::new(env!("CARGO_BIN_EXE_prescaled"))
        .args(["check-config", "--config"])
        .arg(&path)
        .env("RUST_LOG", "error")
        .output()
        .unwrap()
}

#[test]
fn accepts_valid_config() {
    let output = check_config(VALID);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains(": ok"));
}

#[test]
fn rejects_short_eval_interval() {
    let output = check_config(&VALID.replace("eval_interval_secs = 60", "eval_interval_secs = 10"));
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("eval_interval_secs"));
}

#[test]
fn rejects_missing_cluster_name() {
    let output = check_config(&VALID.replace("cluster_name = \"webapp_cluster\"", ""));
    assert!(!output.status.success());
}

#[test]
fn config_path_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prescale.toml");
    std::fs::write(&path, VALID).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_prescaled"))
        .arg("check-config")
        .env("PRESCALE_CONFIG", &path)
        .env("RUST_LOG", "error")
        .output()
        .unwrap();
    assert!(output.status.success());
}

#[test]
fn rejects_zero_min_instances() {
    let output = check_config(&VALID.replace("min_instances = 2", "min_instances = 0"));
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("min_instances"));
}
