mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn create_course_with_matrix(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    course_id: &str,
    po1_strengths: &[i64],
) {
    request_ok(
        stdin,
        reader,
        &format!("{}-create", course_id),
        "courses.create",
        json!({
            "id": course_id,
            "code": course_id,
            "name": format!("Course {}", course_id),
            "semester": 3,
            "credits": 4,
            "departmentId": "D01"
        }),
    );

    let cos: Vec<serde_json::Value> = (1..=po1_strengths.len())
        .map(|i| {
            json!({
                "id": format!("CO{}", i),
                "description": format!("Outcome {}", i),
                "modules": "",
                "kLevel": "K2"
            })
        })
        .collect();
    request_ok(
        stdin,
        reader,
        &format!("{}-config", course_id),
        "courses.saveConfiguration",
        json!({
            "courseId": course_id,
            "cos": cos,
            "settings": {},
            "assessmentTools": []
        }),
    );

    let mut matrix = serde_json::Map::new();
    for (i, strength) in po1_strengths.iter().enumerate() {
        matrix.insert(
            format!("CO{}", i + 1),
            json!({ "PO1": strength }),
        );
    }
    request_ok(
        stdin,
        reader,
        &format!("{}-matrix", course_id),
        "matrix.save",
        json!({ "courseId": course_id, "matrix": matrix }),
    );
}

#[test]
fn evaluation_table_combines_direct_and_indirect_attainment() {
    let workspace = temp_dir("obetrack-dept-report");
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

    // Course CA averages 3.0 on PO1, course CB averages 1.8, course CC has
    // no matrix and must not dilute the direct attainment.
    create_course_with_matrix(&mut stdin, &mut reader, "CA", &[3]);
    create_course_with_matrix(&mut stdin, &mut reader, "CB", &[2, 2, 1, 2, 2]);
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({ "id": "CC", "code": "CC", "name": "Unmapped", "semester": 3, "credits": 3, "departmentId": "D01" }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "surveys.save",
        json!({
            "departmentId": "D01",
            "exitSurvey": { "PO1": 2.0 },
            "employerSurvey": { "PO1": 2.0 },
            "alumniSurvey": {}
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attainment.department",
        json!({ "departmentId": "D01" }),
    );

    let course_rows = report["courseRows"].as_array().unwrap();
    assert_eq!(course_rows.len(), 3);
    let ca_row = course_rows
        .iter()
        .find(|r| r["courseId"].as_str() == Some("CA"))
        .unwrap();
    assert_eq!(ca_row["averages"]["PO1"].as_f64(), Some(3.0));
    let cc_row = course_rows
        .iter()
        .find(|r| r["courseId"].as_str() == Some("CC"))
        .unwrap();
    assert!(cc_row["averages"].as_object().unwrap().is_empty());

    let summary = &report["summary"];
    let direct_po1 = summary["direct"]["PO1"].as_f64().unwrap();
    assert!((direct_po1 - 2.4).abs() < 1e-9);

    // Two of three survey sources rated PO1: divisor is 2, not 3.
    let indirect_po1 = summary["indirect"]["PO1"].as_f64().unwrap();
    assert!((indirect_po1 - 2.0).abs() < 1e-9);

    // Defaults weigh direct 80 / indirect 20: 2.4*0.8 + 2.0*0.2 = 2.32.
    let total_po1 = summary["total"]["PO1"].as_f64().unwrap();
    assert!((total_po1 - 2.32).abs() < 1e-9);
    let pct_po1 = summary["percentage"]["PO1"].as_f64().unwrap();
    assert!((pct_po1 - 2.32 / 3.0 * 100.0).abs() < 1e-9);

    // Nothing maps to PO2 and nobody rated it.
    assert!(summary["direct"].get("PO2").is_none());
    assert_eq!(summary["indirect"]["PO2"].as_f64(), Some(0.0));
    assert_eq!(summary["total"]["PO2"].as_f64(), Some(0.0));
}
