mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn exported_bundle_restores_into_a_fresh_workspace() {
    let workspace = temp_dir("obetrack-backup-src");
    let restore_workspace = temp_dir("obetrack-backup-dst");
    let bundle_path = temp_dir("obetrack-backup-out").join("snapshot.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "departments.create",
        json!({ "id": "D01", "name": "Computer Science" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({ "id": "C101", "code": "CS101", "name": "Data Structures", "semester": 3, "credits": 4, "departmentId": "D01" }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        exported["bundleFormat"].as_str(),
        Some("obetrack-workspace-v1")
    );
    assert!(bundle_path.is_file());

    // Restore into an empty workspace and check the data came along.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": restore_workspace.to_string_lossy() }),
    );
    let before = request_ok(&mut stdin, &mut reader, "6", "courses.list", json!({}));
    assert!(before["courses"].as_array().unwrap().is_empty());

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "backup.import",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        imported["bundleFormatDetected"].as_str(),
        Some("obetrack-workspace-v1")
    );

    let after = request_ok(&mut stdin, &mut reader, "8", "courses.list", json!({}));
    let courses = after["courses"].as_array().unwrap();
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["code"].as_str(), Some("CS101"));
}

#[test]
fn plain_sqlite_files_import_as_legacy_backups() {
    let workspace = temp_dir("obetrack-legacy-src");
    let restore_workspace = temp_dir("obetrack-legacy-dst");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "departments.create",
        json!({ "id": "D01", "name": "Computer Science" }),
    );

    let raw_db = workspace.join("obetrack.sqlite3");
    assert!(raw_db.is_file());

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": restore_workspace.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.import",
        json!({ "inPath": raw_db.to_string_lossy() }),
    );
    assert_eq!(
        imported["bundleFormatDetected"].as_str(),
        Some("legacy-sqlite3")
    );

    let listed = request_ok(&mut stdin, &mut reader, "5", "departments.list", json!({}));
    assert_eq!(listed["departments"].as_array().unwrap().len(), 1);
}
