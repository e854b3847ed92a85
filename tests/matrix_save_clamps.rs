mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn strengths_clamp_into_correlation_range_and_updates_stay_per_course() {
    let workspace = temp_dir("obetrack-matrix");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    for (course_id, req_id) in [("C101", "2"), ("C102", "3")] {
        request_ok(
            &mut stdin,
            &mut reader,
            req_id,
            "courses.create",
            json!({ "id": course_id, "code": course_id, "name": "Course", "semester": 3, "credits": 4 }),
        );
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("{}c", req_id),
            "courses.saveConfiguration",
            json!({
                "courseId": course_id,
                "cos": [{ "id": "CO1", "description": "Outcome", "modules": "", "kLevel": "K1" }],
                "settings": {},
                "assessmentTools": []
            }),
        );
    }

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "matrix.save",
        json!({ "courseId": "C102", "matrix": { "CO1": { "PO2": 2 } } }),
    );

    // 5 clamps down to 3, 0 and negative cells drop out of the map.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "matrix.save",
        json!({
            "courseId": "C101",
            "matrix": { "CO1": { "PO1": 5, "PO2": 0, "PO3": -1, "PO4": 2 } }
        }),
    );
    assert_eq!(saved["matrix"]["CO1"]["PO1"].as_i64(), Some(3));
    assert!(saved["matrix"]["CO1"].get("PO2").is_none());
    assert!(saved["matrix"]["CO1"].get("PO3").is_none());
    assert_eq!(saved["matrix"]["CO1"]["PO4"].as_i64(), Some(2));

    // Saving C101 replaced only its own sub-map.
    let all = request_ok(&mut stdin, &mut reader, "6", "matrix.get", json!({}));
    assert_eq!(all["matrix"]["C102"]["CO1"]["PO2"].as_i64(), Some(2));

    let error = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "matrix.save",
        json!({ "courseId": "C101", "matrix": { "CO9": { "PO1": 3 } } }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));
    assert_eq!(error["details"]["coId"].as_str(), Some("CO9"));
}
