mod test_support;

use serde_json::json;
use test_support::{request, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn health_reports_version_and_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").unwrap().is_null());

    let workspace = temp_dir("obetrack-smoke");
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(
        selected.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );

    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert!(health.get("workspacePath").and_then(|v| v.as_str()).is_some());
}

#[test]
fn unknown_method_and_missing_workspace_are_reported() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let error = request_err(&mut stdin, &mut reader, "1", "nope.method", json!({}));
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    let error = request_err(&mut stdin, &mut reader, "2", "config.get", json!({}));
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("no_workspace")
    );
}

#[test]
fn malformed_json_line_does_not_kill_the_daemon() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    use std::io::{BufRead, Write};
    writeln!(stdin, "this is not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read error line");
    assert!(line.contains("bad_json"));

    let response = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(response.get("ok").and_then(|v| v.as_bool()), Some(true));
}
