use crate::attain::GlobalConfig;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Stored global configuration, falling back to the built-in defaults when
/// the record has never been saved.
pub fn load_global_config(conn: &Connection) -> rusqlite::Result<GlobalConfig> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM configurations WHERE key = 'global'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw
        .and_then(|r| serde_json::from_str(&r).ok())
        .unwrap_or_default())
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let config = match load_global_config(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match serde_json::to_value(&config) {
        Ok(mut value) => {
            value["id"] = json!("global");
            ok(&req.id, value)
        }
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn handle_config_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let config: GlobalConfig = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid configuration: {}", e),
                None,
            )
        }
    };

    let problems = config.validate();
    if !problems.is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "configuration has errors",
            Some(json!({ "problems": problems })),
        );
    }

    let value = match serde_json::to_string(&config) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };

    if let Err(e) = conn.execute(
        "INSERT INTO configurations(key, value) VALUES('global', ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [&value],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "configurations" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(handle_config_get(state, req)),
        "config.save" => Some(handle_config_save(state, req)),
        _ => None,
    }
}
