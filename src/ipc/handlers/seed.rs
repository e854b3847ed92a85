use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Courses exported before the multi-faculty model carry a single
/// assignedFacultyId; fold it into the assignments list on the way in.
fn assignments_of(course: &serde_json::Value) -> serde_json::Value {
    if let Some(list) = course.get("assignedFaculties").filter(|v| v.is_array()) {
        return list.clone();
    }
    if let Some(faculty_id) = course.get("assignedFacultyId").and_then(|v| v.as_str()) {
        return json!([{ "facultyId": faculty_id, "role": "Course Coordinator" }]);
    }
    json!([])
}

/// Loads a JSON export of the original resource store into the workspace in
/// one transaction. Unknown collections are ignored.
fn handle_seed_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing path", None);
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "seed_parse_failed",
                format!("failed to read {}: {}", path, e),
                None,
            )
        }
    };
    let seed: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "seed_parse_failed",
                format!("invalid JSON: {}", e),
                None,
            )
        }
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut counts = serde_json::Map::new();

    if let Some(departments) = seed.get("departments").and_then(|v| v.as_array()) {
        let mut imported = 0usize;
        for dept in departments {
            let (Some(id), Some(name)) = (str_field(dept, "id"), str_field(dept, "name"))
            else {
                continue;
            };
            if let Err(e) = tx.execute(
                "INSERT OR REPLACE INTO departments(id, name) VALUES(?, ?)",
                (&id, &name),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "departments" })),
                );
            }
            imported += 1;
        }
        counts.insert("departments".to_string(), json!(imported));
    }

    if let Some(users) = seed.get("users").and_then(|v| v.as_array()) {
        let mut imported = 0usize;
        for user in users {
            let Some(name) = str_field(user, "name") else {
                continue;
            };
            let id = str_field(user, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
            let email = str_field(user, "email").unwrap_or_default();
            let role = str_field(user, "role").unwrap_or_else(|| "faculty".to_string());
            let department_id = str_field(user, "departmentId");
            if let Err(e) = tx.execute(
                "INSERT OR REPLACE INTO users(id, name, email, role, department_id)
                 VALUES(?, ?, ?, ?, ?)",
                (&id, &name, &email, &role, department_id.as_deref()),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "users" })),
                );
            }
            imported += 1;
        }
        counts.insert("users".to_string(), json!(imported));
    }

    for (collection, kind) in [("pos", "po"), ("psos", "pso")] {
        if let Some(outcomes) = seed.get(collection).and_then(|v| v.as_array()) {
            let mut imported = 0usize;
            for outcome in outcomes {
                let (Some(id), Some(description)) =
                    (str_field(outcome, "id"), str_field(outcome, "description"))
                else {
                    continue;
                };
                let department_id = str_field(outcome, "departmentId");
                if let Err(e) = tx.execute(
                    "INSERT OR REPLACE INTO outcomes(id, description, kind, department_id)
                     VALUES(?, ?, ?, ?)",
                    (&id, &description, kind, department_id.as_deref()),
                ) {
                    let _ = tx.rollback();
                    return err(
                        &req.id,
                        "db_insert_failed",
                        e.to_string(),
                        Some(json!({ "table": "outcomes" })),
                    );
                }
                imported += 1;
            }
            counts.insert(collection.to_string(), json!(imported));
        }
    }

    if let Some(courses) = seed.get("courses").and_then(|v| v.as_array()) {
        let mut imported = 0usize;
        for course in courses {
            let (Some(id), Some(code), Some(name)) = (
                str_field(course, "id"),
                str_field(course, "code"),
                str_field(course, "name"),
            ) else {
                continue;
            };
            let semester = course.get("semester").and_then(|v| v.as_i64()).unwrap_or(1);
            let credits = course.get("credits").and_then(|v| v.as_i64()).unwrap_or(0);
            let department_id = str_field(course, "departmentId");
            let cos = course.get("cos").cloned().unwrap_or_else(|| json!([]));
            let tools = course
                .get("assessmentTools")
                .cloned()
                .unwrap_or_else(|| json!([]));
            let settings = course.get("settings").cloned().unwrap_or_else(|| json!({}));
            let assigned = assignments_of(course);
            if let Err(e) = tx.execute(
                "INSERT OR REPLACE INTO courses(
                   id, code, name, semester, credits, department_id,
                   cos, assessment_tools, settings, assigned_faculties
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &code,
                    &name,
                    semester,
                    credits,
                    department_id.as_deref(),
                    cos.to_string(),
                    tools.to_string(),
                    settings.to_string(),
                    assigned.to_string(),
                ),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "courses" })),
                );
            }
            imported += 1;
        }
        counts.insert("courses".to_string(), json!(imported));
    }

    if let Some(matrix) = seed.get("articulationMatrix").and_then(|v| v.as_object()) {
        let mut imported = 0usize;
        for (course_id, sub_map) in matrix {
            if !sub_map.is_object() {
                continue;
            }
            if let Err(e) = tx.execute(
                "INSERT OR REPLACE INTO articulation_matrix(course_id, matrix) VALUES(?, ?)",
                (course_id, sub_map.to_string()),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "articulation_matrix" })),
                );
            }
            imported += 1;
        }
        counts.insert("articulationMatrix".to_string(), json!(imported));
    }

    if let Some(configurations) = seed.get("configurations") {
        let global = if let Some(arr) = configurations.as_array() {
            arr.iter()
                .find(|c| c.get("id").and_then(|v| v.as_str()) == Some("global"))
                .cloned()
        } else {
            configurations.get("global").cloned()
        };
        if let Some(global) = global {
            if let Err(e) = tx.execute(
                "INSERT OR REPLACE INTO configurations(key, value) VALUES('global', ?)",
                [global.to_string()],
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "configurations" })),
                );
            }
            counts.insert("configurations".to_string(), json!(1));
        }
    }

    if let Some(surveys) = seed.get("surveys") {
        let records: Vec<(String, serde_json::Value)> = if let Some(arr) = surveys.as_array() {
            arr.iter()
                .filter_map(|s| {
                    str_field(s, "departmentId")
                        .or_else(|| str_field(s, "department"))
                        .map(|dept| (dept, s.clone()))
                })
                .collect()
        } else if let Some(map) = surveys.as_object() {
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        } else {
            Vec::new()
        };

        let mut imported = 0usize;
        for (department_id, record) in records {
            let exit = record.get("exitSurvey").cloned().unwrap_or_else(|| json!({}));
            let employer = record
                .get("employerSurvey")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let alumni = record
                .get("alumniSurvey")
                .cloned()
                .unwrap_or_else(|| json!({}));
            if let Err(e) = tx.execute(
                "INSERT OR REPLACE INTO surveys(
                   department_id, exit_survey, employer_survey, alumni_survey
                 ) VALUES(?, ?, ?, ?)",
                (
                    &department_id,
                    exit.to_string(),
                    employer.to_string(),
                    alumni.to_string(),
                ),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "surveys" })),
                );
            }
            imported += 1;
        }
        counts.insert("surveys".to_string(), json!(imported));
    }

    if let Some(students) = seed.get("students").and_then(|v| v.as_array()) {
        let mut imported = 0usize;
        for student in students {
            let (Some(id), Some(name), Some(usn)) = (
                str_field(student, "id"),
                str_field(student, "name"),
                str_field(student, "usn"),
            ) else {
                continue;
            };
            let course_ids = student
                .get("courseIds")
                .or_else(|| student.get("courses"))
                .cloned()
                .unwrap_or_else(|| json!([]));
            if let Err(e) = tx.execute(
                "INSERT OR REPLACE INTO students(id, name, usn, course_ids) VALUES(?, ?, ?, ?)",
                (&id, &name, &usn, course_ids.to_string()),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "students" })),
                );
            }
            imported += 1;
        }
        counts.insert("students".to_string(), json!(imported));
    }

    if let Some(marks) = seed.get("marks").and_then(|v| v.as_array()) {
        let mut imported = 0usize;
        for mark in marks {
            let (Some(student_id), Some(course_id), Some(assessment_name)) = (
                str_field(mark, "studentId"),
                str_field(mark, "courseId"),
                str_field(mark, "assessmentName"),
            ) else {
                continue;
            };
            let id = str_field(mark, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
            let scores = mark.get("scores").cloned().unwrap_or_else(|| json!({}));
            let improvement = str_field(mark, "improvementTestFor");
            if let Err(e) = tx.execute(
                "INSERT OR REPLACE INTO marks(
                   id, student_id, course_id, assessment_name, scores, improvement_test_for
                 ) VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &student_id,
                    &course_id,
                    &assessment_name,
                    scores.to_string(),
                    improvement.as_deref(),
                ),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "marks" })),
                );
            }
            imported += 1;
        }
        counts.insert("marks".to_string(), json!(imported));
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "imported": counts }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "seed.import" => Some(handle_seed_import(state, req)),
        _ => None,
    }
}
