mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn department_lifecycle_with_counts_and_cascade() {
    let workspace = temp_dir("obetrack-departments");
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

    let listed = request_ok(&mut stdin, &mut reader, "3", "departments.list", json!({}));
    let departments = listed.get("departments").and_then(|v| v.as_array()).unwrap();
    assert_eq!(departments.len(), 1);
    assert_eq!(
        departments[0].get("courseCount").and_then(|v| v.as_i64()),
        Some(0)
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({
            "id": "C101",
            "code": "CS101",
            "name": "Data Structures",
            "semester": 3,
            "credits": 4,
            "departmentId": "D01"
        }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "5", "departments.list", json!({}));
    let departments = listed.get("departments").and_then(|v| v.as_array()).unwrap();
    assert_eq!(
        departments[0].get("courseCount").and_then(|v| v.as_i64()),
        Some(1)
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "departments.update",
        json!({ "departmentId": "D01", "name": "CS & Engineering" }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "7", "departments.list", json!({}));
    assert_eq!(
        listed["departments"][0].get("name").and_then(|v| v.as_str()),
        Some("CS & Engineering")
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "departments.delete",
        json!({ "departmentId": "D01" }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "9", "departments.list", json!({}));
    assert!(listed["departments"].as_array().unwrap().is_empty());

    // The department's courses went with it.
    let courses = request_ok(&mut stdin, &mut reader, "10", "courses.list", json!({}));
    assert!(courses["courses"].as_array().unwrap().is_empty());

    let error = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "departments.delete",
        json!({ "departmentId": "D01" }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));
}
