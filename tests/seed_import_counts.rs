mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn resource_store_export_loads_with_per_collection_counts() {
    let workspace = temp_dir("obetrack-seed");
    let seed_path = workspace.join("db.json");
    let seed = json!({
        "departments": [{ "id": "D01", "name": "Computer Science" }],
        "users": [
            { "id": "F9", "name": "Asha", "email": "asha@example.edu", "role": "faculty", "departmentId": "D01" }
        ],
        "pos": [
            { "id": "PO1", "description": "Engineering knowledge" },
            { "id": "PO2", "description": "Problem analysis" }
        ],
        "psos": [
            { "id": "PSO1", "description": "Domain systems", "departmentId": "D01" }
        ],
        "courses": [{
            "id": "C101",
            "code": "CS101",
            "name": "Data Structures",
            "semester": 3,
            "credits": 4,
            "departmentId": "D01",
            "cos": [{ "id": "CO1", "description": "Outcome", "modules": "", "kLevel": "K2" }],
            "assessmentTools": [],
            "settings": {},
            "assignedFacultyId": "F9"
        }],
        "articulationMatrix": {
            "C101": { "CO1": { "PO1": 3 } }
        },
        "configurations": [{
            "id": "global",
            "attainmentRules": {
                "studentPassThreshold": 50,
                "maxAttainmentLevel": 3,
                "levelThresholds": { "level3": 70, "level2": 60, "level1": 50 },
                "finalWeightage": { "direct": 80, "indirect": 20 },
                "directSplit": { "cie": 50, "see": 50 }
            },
            "indirectTools": []
        }],
        "surveys": [{
            "departmentId": "D01",
            "exitSurvey": { "PO1": 2.5 },
            "employerSurvey": {},
            "alumniSurvey": {}
        }],
        "students": [
            { "id": "s1", "name": "Bela", "usn": "1XX22CS001", "courseIds": ["C101"] }
        ],
        "marks": [{
            "studentId": "s1",
            "courseId": "C101",
            "assessmentName": "Internal Assessment 1",
            "scores": { "CO1": 15 }
        }],
        "unknownCollection": [{ "whatever": true }]
    });
    std::fs::write(&seed_path, serde_json::to_string_pretty(&seed).unwrap())
        .expect("write seed file");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "seed.import",
        json!({ "path": seed_path.to_string_lossy() }),
    );
    let counts = &imported["imported"];
    assert_eq!(counts["departments"].as_i64(), Some(1));
    assert_eq!(counts["users"].as_i64(), Some(1));
    assert_eq!(counts["pos"].as_i64(), Some(2));
    assert_eq!(counts["psos"].as_i64(), Some(1));
    assert_eq!(counts["courses"].as_i64(), Some(1));
    assert_eq!(counts["articulationMatrix"].as_i64(), Some(1));
    assert_eq!(counts["configurations"].as_i64(), Some(1));
    assert_eq!(counts["surveys"].as_i64(), Some(1));
    assert_eq!(counts["students"].as_i64(), Some(1));
    assert_eq!(counts["marks"].as_i64(), Some(1));
    assert!(counts.get("unknownCollection").is_none());

    // The legacy single-faculty field came through as an assignments list.
    let courses = request_ok(&mut stdin, &mut reader, "3", "courses.list", json!({}));
    let assignments = courses["courses"][0]["assignedFaculties"].as_array().unwrap();
    assert_eq!(assignments[0]["facultyId"].as_str(), Some("F9"));

    // Outcomes list POs before PSOs.
    let outcomes = request_ok(&mut stdin, &mut reader, "4", "outcomes.list", json!({}));
    let ids: Vec<&str> = outcomes["outcomes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["PO1", "PO2", "PSO1"]);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "seed.import",
        json!({ "path": workspace.join("missing.json").to_string_lossy() }),
    );
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("seed_parse_failed")
    );
}
