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

fn handle_departments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "departments": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Use correlated subqueries to avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           d.id,
           d.name,
           (SELECT COUNT(*) FROM courses c WHERE c.department_id = d.id) AS course_count,
           (SELECT COUNT(*) FROM users u WHERE u.department_id = d.id AND u.role = 'faculty') AS faculty_count
         FROM departments d
         ORDER BY d.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let course_count: i64 = row.get(2)?;
            let faculty_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "courseCount": course_count,
                "facultyCount": faculty_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(departments) => ok(&req.id, json!({ "departments": departments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let id = match required_str(req, "id") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if id.is_empty() || name.is_empty() {
        return err(&req.id, "bad_params", "id/name must not be empty", None);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO departments(id, name) VALUES(?, ?)",
        (&id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "departments" })),
        );
    }

    ok(&req.id, json!({ "departmentId": id, "name": name }))
}

fn handle_departments_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let department_id = match required_str(req, "departmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let changed = match conn.execute(
        "UPDATE departments SET name = ? WHERE id = ?",
        (&name, &department_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "departments" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "department not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_departments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let department_id = match required_str(req, "departmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM departments WHERE id = ?",
            [&department_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "department not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM marks
         WHERE course_id IN (SELECT id FROM courses WHERE department_id = ?)",
        [&department_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM articulation_matrix
         WHERE course_id IN (SELECT id FROM courses WHERE department_id = ?)",
        [&department_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "articulation_matrix" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM courses WHERE department_id = ?",
        [&department_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM surveys WHERE department_id = ?",
        [&department_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "surveys" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM outcomes WHERE department_id = ? AND kind = 'pso'",
        [&department_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "outcomes" })),
        );
    }

    // Users survive their department; they just lose the reference.
    if let Err(e) = tx.execute(
        "UPDATE users SET department_id = NULL WHERE department_id = ?",
        [&department_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM departments WHERE id = ?", [&department_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "departments" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.list" => Some(handle_departments_list(state, req)),
        "departments.create" => Some(handle_departments_create(state, req)),
        "departments.update" => Some(handle_departments_update(state, req)),
        "departments.delete" => Some(handle_departments_delete(state, req)),
        _ => None,
    }
}
