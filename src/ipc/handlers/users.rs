use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ROLES: &[&str] = &["faculty", "admin", "superadmin"];

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

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut where_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(role) = req.params.get("role").and_then(|v| v.as_str()) {
        if !ROLES.contains(&role) {
            return err(
                &req.id,
                "bad_params",
                "role must be one of: faculty, admin, superadmin",
                Some(json!({ "role": role })),
            );
        }
        where_parts.push("role = ?");
        bind_values.push(Value::Text(role.to_string()));
    }
    if let Some(dept) = req.params.get("departmentId").and_then(|v| v.as_str()) {
        where_parts.push("department_id = ?");
        bind_values.push(Value::Text(dept.to_string()));
    }

    let mut sql =
        "SELECT id, name, email, role, department_id FROM users".to_string();
    if !where_parts.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_parts.join(" AND "));
    }
    sql.push_str(" ORDER BY name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(params_from_iter(bind_values), |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let email: String = row.get(2)?;
            let role: String = row.get(3)?;
            let department_id: Option<String> = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "email": email,
                "role": role,
                "departmentId": department_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let role = match required_str(req, "role") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if name.is_empty() || email.is_empty() {
        return err(&req.id, "bad_params", "name/email must not be empty", None);
    }
    if !ROLES.contains(&role.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: faculty, admin, superadmin",
            Some(json!({ "role": role })),
        );
    }

    let department_id = req
        .params
        .get("departmentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Some(dept) = &department_id {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM departments WHERE id = ?", [dept], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "department not found", None);
        }
    }

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, name, email, role, department_id) VALUES(?, ?, ?, ?, ?)",
        (&user_id, &name, &email, &role, department_id.as_deref()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(&req.id, json!({ "userId": user_id }))
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("email") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.email must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "email must not be empty", None);
        }
        set_parts.push("email = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("role") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.role must be a string", None);
        };
        if !ROLES.contains(&s) {
            return err(
                &req.id,
                "bad_params",
                "role must be one of: faculty, admin, superadmin",
                Some(json!({ "role": s })),
            );
        }
        set_parts.push("role = ?".into());
        bind_values.push(Value::Text(s.to_string()));
    }
    if let Some(v) = patch.get("departmentId") {
        if v.is_null() {
            set_parts.push("department_id = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            set_parts.push("department_id = ?".into());
            bind_values.push(Value::Text(s.to_string()));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.departmentId must be a string or null",
                None,
            );
        }
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    let sql = format!("UPDATE users SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(user_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "users" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "user not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let changed = match conn.execute("DELETE FROM users WHERE id = ?", [&user_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "users" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "user not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        _ => None,
    }
}
