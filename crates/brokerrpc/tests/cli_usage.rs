#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn brokerrpc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_brokerrpc"))
        .args(["--log-level", "error"])
        .args(args)
        .env_remove("BROKERRPC_URI")
        .output()
        .expect("brokerrpc should run")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn version_prints_name_and_version() {
    let output = brokerrpc(&["version", "--extended"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("brokerrpc "));
    assert!(stdout.contains("defaults: reconnect=5s pool=8/8/32"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    assert!(stdout.contains("amqp"));
}

#[test]
fn call_rejects_unsupported_uri_scheme() {
    let output = brokerrpc(&[
        "call",
        "40",
        "2",
        "--reply-service",
        "9",
        "--uri",
        "memory://",
    ]);
    assert_eq!(output.status.code(), Some(64), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("unsupported broker URI"));
}

#[test]
fn call_rejects_invalid_timeout() {
    let output = brokerrpc(&[
        "call",
        "40",
        "2",
        "--reply-service",
        "9",
        "--timeout",
        "soon",
    ]);
    assert_eq!(output.status.code(), Some(64), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("invalid duration"));
}

#[test]
fn notify_rejects_invalid_json_before_connecting() {
    let output = brokerrpc(&[
        "notify",
        "40",
        "2",
        "--json",
        "{not json",
        "--uri",
        "amqp://127.0.0.1:1/%2f",
    ]);
    assert_eq!(output.status.code(), Some(64), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("--json is not valid JSON"));
}

#[test]
fn conflicting_payload_flags_are_a_usage_error() {
    let output = brokerrpc(&["notify", "40", "2", "--json", "{}", "--data", "x"]);
    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr(&output));
}
