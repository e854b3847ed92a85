use crate::attain::MarkRecord;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// All mark records for a course, as the attainment engine consumes them.
pub fn load_mark_records(conn: &Connection, course_id: &str) -> rusqlite::Result<Vec<MarkRecord>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, assessment_name, improvement_test_for, scores
         FROM marks WHERE course_id = ?",
    )?;
    let rows = stmt
        .query_map([course_id], |row| {
            let student_id: String = row.get(0)?;
            let assessment_name: String = row.get(1)?;
            let improvement_test_for: Option<String> = row.get(2)?;
            let raw_scores: String = row.get(3)?;
            let scores: BTreeMap<String, serde_json::Value> =
                serde_json::from_str(&raw_scores).unwrap_or_default();
            Ok(MarkRecord {
                student_id,
                assessment_name,
                improvement_test_for,
                scores,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut where_parts = vec!["course_id = ?"];
    let mut bind_values = vec![Value::Text(course_id)];
    if let Some(name) = req.params.get("assessmentName").and_then(|v| v.as_str()) {
        where_parts.push("assessment_name = ?");
        bind_values.push(Value::Text(name.to_string()));
    }
    if let Some(student) = req.params.get("studentId").and_then(|v| v.as_str()) {
        where_parts.push("student_id = ?");
        bind_values.push(Value::Text(student.to_string()));
    }

    let sql = format!(
        "SELECT id, student_id, assessment_name, improvement_test_for, scores
         FROM marks WHERE {}
         ORDER BY assessment_name, student_id",
        where_parts.join(" AND ")
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(params_from_iter(bind_values), |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let assessment_name: String = row.get(2)?;
            let improvement_test_for: Option<String> = row.get(3)?;
            let raw_scores: String = row.get(4)?;
            let scores: serde_json::Value =
                serde_json::from_str(&raw_scores).unwrap_or_else(|_| json!({}));
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "assessmentName": assessment_name,
                "improvementTestFor": improvement_test_for,
                "scores": scores
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(marks) => ok(&req.id, json!({ "marks": marks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Bulk upsert of one assessment's entries. Each entry replaces the record
/// keyed by (student, course, assessment).
fn handle_marks_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let assessment_name = match required_str(req, "assessmentName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing/invalid entries", None);
    };

    let course_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if course_exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut saved = 0usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            let _ = tx.rollback();
            return err(&req.id, "bad_params", "entries need a studentId", None);
        };
        let scores = entry.get("scores").cloned().unwrap_or_else(|| json!({}));
        if !scores.is_object() {
            let _ = tx.rollback();
            return err(
                &req.id,
                "bad_params",
                "entry scores must be an object",
                Some(json!({ "studentId": student_id })),
            );
        }
        let improvement_test_for = entry
            .get("improvementTestFor")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let student_exists: Option<i64> = match tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        if student_exists.is_none() {
            let _ = tx.rollback();
            return err(
                &req.id,
                "not_found",
                "student not found",
                Some(json!({ "studentId": student_id })),
            );
        }

        let mark_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO marks(id, student_id, course_id, assessment_name, scores, improvement_test_for)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, course_id, assessment_name) DO UPDATE SET
               scores = excluded.scores,
               improvement_test_for = excluded.improvement_test_for",
            (
                &mark_id,
                student_id,
                &course_id,
                &assessment_name,
                scores.to_string(),
                improvement_test_for.as_deref(),
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
        saved += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "saved": saved }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.list" => Some(handle_marks_list(state, req)),
        "marks.save" => Some(handle_marks_save(state, req)),
        _ => None,
    }
}
