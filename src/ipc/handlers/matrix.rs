use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::courses::load_course;

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

fn handle_matrix_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "matrix": {} }));
    };

    if let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_str()) {
        let raw: Option<String> = match conn
            .query_row(
                "SELECT matrix FROM articulation_matrix WHERE course_id = ?",
                [course_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let matrix: serde_json::Value = raw
            .and_then(|r| serde_json::from_str(&r).ok())
            .unwrap_or_else(|| json!({}));
        return ok(&req.id, json!({ "matrix": matrix }));
    }

    let mut stmt = match conn.prepare("SELECT course_id, matrix FROM articulation_matrix") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(rows) => {
            let mut all = serde_json::Map::new();
            for (course_id, raw) in rows {
                let matrix: serde_json::Value =
                    serde_json::from_str(&raw).unwrap_or_else(|_| json!({}));
                all.insert(course_id, matrix);
            }
            ok(&req.id, json!({ "matrix": all }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Replaces one course's CO-outcome sub-map. Strengths are clamped into the
/// 1-3 correlation range; empty and non-positive cells fall out of the map.
fn handle_matrix_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(submitted) = req.params.get("matrix").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid matrix", None);
    };

    let course = match load_course(conn, &course_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let known_cos: Vec<String> = course
        .cos
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|co| co.get("id").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let mut clean = serde_json::Map::new();
    for (co_id, outcome_map) in submitted {
        if !known_cos.iter().any(|c| c == co_id) {
            return err(
                &req.id,
                "bad_params",
                "matrix references a CO the course does not define",
                Some(json!({ "coId": co_id })),
            );
        }
        let Some(outcome_map) = outcome_map.as_object() else {
            return err(
                &req.id,
                "bad_params",
                "matrix entries must map outcome ids to strengths",
                Some(json!({ "coId": co_id })),
            );
        };
        let mut clean_outcomes = serde_json::Map::new();
        for (outcome_id, strength) in outcome_map {
            let Some(n) = strength.as_f64() else {
                continue;
            };
            if n <= 0.0 {
                continue;
            }
            let clamped = n.clamp(1.0, 3.0).round() as i64;
            clean_outcomes.insert(outcome_id.clone(), json!(clamped));
        }
        if !clean_outcomes.is_empty() {
            clean.insert(co_id.clone(), json!(clean_outcomes));
        }
    }

    let matrix_text = json!(clean).to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO articulation_matrix(course_id, matrix) VALUES(?, ?)
         ON CONFLICT(course_id) DO UPDATE SET matrix = excluded.matrix",
        (&course_id, &matrix_text),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "articulation_matrix" })),
        );
    }

    ok(&req.id, json!({ "ok": true, "matrix": clean }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "matrix.get" => Some(handle_matrix_get(state, req)),
        "matrix.save" => Some(handle_matrix_save(state, req)),
        _ => None,
    }
}
