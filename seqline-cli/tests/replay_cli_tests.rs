//! Integration tests for the seqline binary.

use std::{fs, path::Path, time::Duration};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use tempfile::TempDir;

fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> String {
    let path = dir.join(name);
    fs::write(&path, lines.join("\n")).unwrap();
    path.display().to_string()
}

fn dispatched_ids(stdout: &[u8]) -> Vec<String> {
    String::from_utf8(stdout.to_vec())
        .unwrap()
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            format!("{}:{}", value["cid"].as_str().unwrap_or("-"), value["id"].as_str().unwrap_or("-"))
        })
        .collect()
}

#[test]
fn test_replay_command_help() {
    let mut cmd = cargo_bin_cmd!("seqline");
    cmd.arg("replay").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("--events"))
        .stdout(predicates::str::contains("--history"))
        .stdout(predicates::str::contains("--history-url"))
        .stdout(predicates::str::contains("--summary"));
}

#[test]
fn test_replay_requires_events() {
    let mut cmd = cargo_bin_cmd!("seqline");
    cmd.arg("replay").timeout(Duration::from_secs(5));

    cmd.assert().failure().stderr(predicates::str::contains(
        "the following required arguments were not provided",
    ));
}

#[test]
fn test_replay_orders_and_recovers_from_archive() {
    let dir = TempDir::new().unwrap();
    let events = write_lines(
        dir.path(),
        "events.jsonl",
        &[
            r#"{"id":"1","cid":"CON-A","type":"text"}"#,
            r#"{"id":"20","cid":"CON-B","type":"text"}"#,
            r#"{"id":"4","cid":"CON-A","type":"text"}"#,
            r#"{"id":"3","cid":"CON-A","type":"text"}"#,
            r#"{"id":"21","cid":"CON-B","type":"text"}"#,
        ],
    );
    let history = write_lines(
        dir.path(),
        "history.jsonl",
        &[r#"{"id":"2","cid":"CON-A","type":"image"}"#],
    );

    let output = cargo_bin_cmd!("seqline")
        .env("RUST_LOG", "off")
        .args(["replay", "--events", &events, "--history", &history, "--summary"])
        .timeout(Duration::from_secs(10))
        .output()
        .unwrap();

    assert!(output.status.success());
    let ids = dispatched_ids(&output.stdout);
    let con_a: Vec<&String> = ids.iter().filter(|id| id.starts_with("CON-A")).collect();
    let con_b: Vec<&String> = ids.iter().filter(|id| id.starts_with("CON-B")).collect();
    assert_eq!(con_a, vec!["CON-A:1", "CON-A:2", "CON-A:3", "CON-A:4"]);
    assert_eq!(con_b, vec!["CON-B:20", "CON-B:21"]);

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("CON-A last_processed=4"));
    assert!(stderr.contains("CON-B last_processed=21"));
}

#[test]
fn test_replay_skips_unrecoverable_ids_without_history() {
    let output = cargo_bin_cmd!("seqline")
        .env("RUST_LOG", "off")
        .args(["replay", "--events", "-", "--summary"])
        .write_stdin(
            [
                r#"{"id":5,"cid":"CON-A","type":"text"}"#,
                r#"{"id":7,"cid":"CON-A","type":"text"}"#,
                r#"{"type":"custom"}"#,
            ]
            .join("\n"),
        )
        .timeout(Duration::from_secs(10))
        .output()
        .unwrap();

    assert!(output.status.success());
    let ids = dispatched_ids(&output.stdout);
    assert_eq!(ids, vec!["-:-", "CON-A:5", "CON-A:7"]);
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("CON-A last_processed=7 high_water_mark=7 dispatched=2 skipped=1"));
}

#[test]
fn test_replay_prints_metrics() {
    let dir = TempDir::new().unwrap();
    let events = write_lines(
        dir.path(),
        "events.jsonl",
        &[r#"{"id":"1","cid":"CON-A","type":"text"}"#],
    );

    cargo_bin_cmd!("seqline")
        .env("RUST_LOG", "off")
        .args(["replay", "--events", &events, "--metrics"])
        .timeout(Duration::from_secs(10))
        .assert()
        .success()
        .stderr(predicates::str::contains("seqline_events_dispatched_total"));
}

#[test]
fn test_replay_rejects_malformed_event() {
    let dir = TempDir::new().unwrap();
    let events = write_lines(dir.path(), "events.jsonl", &["{not json"]);

    cargo_bin_cmd!("seqline")
        .args(["replay", "--events", &events])
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicates::str::contains("invalid event on line 1"));
}

#[test]
fn test_replay_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let config = write_lines(
        dir.path(),
        "config.toml",
        &["[sequencing]", "fetch_window = 0"],
    );

    cargo_bin_cmd!("seqline")
        .args(["replay", "--events", "-", "--config", &config])
        .write_stdin("")
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicates::str::contains("fetch_window must be greater than 0"));
}

#[test]
fn test_config_command_writes_requested_format() {
    let dir = TempDir::new().unwrap();

    cargo_bin_cmd!("seqline")
        .current_dir(dir.path())
        .args(["config", "--format", "toml"])
        .assert()
        .success()
        .stdout(predicates::str::contains("config.toml"));

    let written = fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(written.contains("fetch_window = 9"));

    cargo_bin_cmd!("seqline")
        .current_dir(dir.path())
        .args(["config", "--format", "ini"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("Unsupported configuration format").and(predicates::str::contains("ini")));
}

#[test]
fn test_completion_command_generates_script() {
    cargo_bin_cmd!("seqline")
        .args(["completion", "--shell", "bash"])
        .assert()
        .success()
        .stdout(predicates::str::contains("seqline"));
}
