mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn outcomes_below_the_threshold_get_improvement_suggestions() {
    let workspace = temp_dir("obetrack-improvement");
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
    for (id, req) in [("PO1", "3"), ("PO2", "4")] {
        request_ok(
            &mut stdin,
            &mut reader,
            req,
            "outcomes.create",
            json!({ "id": id, "description": format!("Outcome {}", id), "kind": "po" }),
        );
    }

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({ "id": "C101", "code": "CS101", "name": "Data Structures", "semester": 3, "credits": 4, "departmentId": "D01" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.saveConfiguration",
        json!({
            "courseId": "C101",
            "cos": [{ "id": "CO1", "description": "Outcome", "modules": "", "kLevel": "K2" }],
            "settings": {},
            "assessmentTools": []
        }),
    );
    // PO1 attains fully (3.0 direct); PO2 limps at 2.0 direct with no survey
    // backing: total 2.0*0.8 = 1.6 < 1.9.
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "matrix.save",
        json!({ "courseId": "C101", "matrix": { "CO1": { "PO1": 3, "PO2": 2 } } }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "surveys.save",
        json!({
            "departmentId": "D01",
            "exitSurvey": { "PO1": 3.0 },
            "employerSurvey": { "PO1": 3.0 },
            "alumniSurvey": { "PO1": 3.0 }
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attainment.improvement",
        json!({ "departmentId": "D01" }),
    );

    assert!((report["threshold"].as_f64().unwrap() - 1.9).abs() < 1e-9);
    let low = report["lowPerformers"].as_array().unwrap();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0]["id"].as_str(), Some("PO2"));
    let attained = low[0]["attained"].as_f64().unwrap();
    assert!((attained - 1.6).abs() < 1e-9);

    // PO2 has a specific suggestion list; unknown ids would fall back to the
    // generic one.
    let suggestions = low[0]["suggestions"].as_array().unwrap();
    assert!(suggestions[0].as_str().unwrap().contains("problem-solving"));
}
