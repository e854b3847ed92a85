use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn numeric_suffix(id: &str) -> i64 {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct OutcomeRow {
    pub id: String,
    pub description: String,
    pub kind: String,
    pub department_id: Option<String>,
}

pub fn load_outcome_ids(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let rows = load_outcomes(conn)?;
    Ok(rows.into_iter().map(|o| o.id).collect())
}

pub fn load_outcomes(conn: &Connection) -> rusqlite::Result<Vec<OutcomeRow>> {
    let mut stmt =
        conn.prepare("SELECT id, description, kind, department_id FROM outcomes")?;
    let mut rows = stmt
        .query_map([], |row| {
            Ok(OutcomeRow {
                id: row.get(0)?,
                description: row.get(1)?,
                kind: row.get(2)?,
                department_id: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // POs come before PSOs, each block ordered by the numeric suffix so PO10
    // sorts after PO9.
    rows.sort_by(|a, b| {
        (a.kind != "po")
            .cmp(&(b.kind != "po"))
            .then(numeric_suffix(&a.id).cmp(&numeric_suffix(&b.id)))
            .then(a.id.cmp(&b.id))
    });
    Ok(rows)
}

fn handle_outcomes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "outcomes": [] }));
    };

    let rows = match load_outcomes(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let outcomes: Vec<serde_json::Value> = rows
        .iter()
        .map(|o| {
            json!({
                "id": o.id,
                "description": o.description,
                "kind": o.kind,
                "departmentId": o.department_id
            })
        })
        .collect();

    ok(&req.id, json!({ "outcomes": outcomes }))
}

fn handle_outcomes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let id = match required_str(req, "id") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let description = match required_str(req, "description") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let kind = match required_str(req, "kind") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if id.is_empty() || description.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "id/description must not be empty",
            None,
        );
    }
    if kind != "po" && kind != "pso" {
        return err(
            &req.id,
            "bad_params",
            "kind must be po or pso",
            Some(json!({ "kind": kind })),
        );
    }

    let department_id = req
        .params
        .get("departmentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    if kind == "pso" && department_id.is_none() {
        return err(&req.id, "bad_params", "PSOs need a departmentId", None);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO outcomes(id, description, kind, department_id) VALUES(?, ?, ?, ?)",
        (&id, &description, &kind, department_id.as_deref()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "outcomes" })),
        );
    }

    ok(&req.id, json!({ "outcomeId": id }))
}

fn handle_outcomes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let outcome_id = match required_str(req, "outcomeId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let description = match required_str(req, "description") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if description.is_empty() {
        return err(&req.id, "bad_params", "description must not be empty", None);
    }

    let changed = match conn.execute(
        "UPDATE outcomes SET description = ? WHERE id = ?",
        (&description, &outcome_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "outcomes" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "outcome not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn strip_outcome_from_json_map(raw: &str, outcome_id: &str) -> Option<String> {
    let mut value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let map = value.as_object_mut()?;
    let mut touched = map.remove(outcome_id).is_some();
    // Matrix sub-maps nest one level deeper (coId -> outcomeId -> strength).
    for co_map in map.values_mut() {
        if let Some(inner) = co_map.as_object_mut() {
            touched |= inner.remove(outcome_id).is_some();
        }
    }
    if touched {
        Some(value.to_string())
    } else {
        None
    }
}

fn handle_outcomes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let outcome_id = match required_str(req, "outcomeId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM outcomes WHERE id = ?", [&outcome_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "outcome not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // The outcome disappears from every course's matrix sub-map and from
    // every department's survey maps; this is the caller-side cascade the
    // store does not do for us.
    let matrices: Vec<(String, String)> = {
        let mut stmt = match tx.prepare("SELECT course_id, matrix FROM articulation_matrix") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };
    for (course_id, raw) in matrices {
        if let Some(updated) = strip_outcome_from_json_map(&raw, &outcome_id) {
            if let Err(e) = tx.execute(
                "UPDATE articulation_matrix SET matrix = ? WHERE course_id = ?",
                (&updated, &course_id),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "articulation_matrix" })),
                );
            }
        }
    }

    let surveys: Vec<(String, String, String, String)> = {
        let mut stmt = match tx.prepare(
            "SELECT department_id, exit_survey, employer_survey, alumni_survey FROM surveys",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };
    for (department_id, exit_raw, employer_raw, alumni_raw) in surveys {
        let exit = strip_outcome_from_json_map(&exit_raw, &outcome_id);
        let employer = strip_outcome_from_json_map(&employer_raw, &outcome_id);
        let alumni = strip_outcome_from_json_map(&alumni_raw, &outcome_id);
        if exit.is_none() && employer.is_none() && alumni.is_none() {
            continue;
        }
        if let Err(e) = tx.execute(
            "UPDATE surveys SET exit_survey = ?, employer_survey = ?, alumni_survey = ?
             WHERE department_id = ?",
            (
                exit.unwrap_or(exit_raw),
                employer.unwrap_or(employer_raw),
                alumni.unwrap_or(alumni_raw),
                &department_id,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "surveys" })),
            );
        }
    }

    if let Err(e) = tx.execute("DELETE FROM outcomes WHERE id = ?", [&outcome_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "outcomes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "outcomes.list" => Some(handle_outcomes_list(state, req)),
        "outcomes.create" => Some(handle_outcomes_create(state, req)),
        "outcomes.update" => Some(handle_outcomes_update(state, req)),
        "outcomes.delete" => Some(handle_outcomes_delete(state, req)),
        _ => None,
    }
}
