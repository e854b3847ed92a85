use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::tools::{self, AssessmentTool, ToolKind};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;

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

fn co_ids_of(cos: &serde_json::Value) -> Vec<String> {
    cos.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|co| co.get("id").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Saves a course's CO definitions, settings and assessment plan in one step.
/// Tool names are reconstructed server-side from their tagged parts, and COs
/// removed from the definition list are stripped from the articulation matrix
/// and every tool's distribution before validation.
fn handle_save_configuration(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course = match load_course(conn, &course_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some(cos) = req.params.get("cos").filter(|v| v.is_array()).cloned() else {
        return err(&req.id, "bad_params", "missing/invalid cos", None);
    };
    let new_co_ids = co_ids_of(&cos);
    let mut seen_cos: HashSet<&str> = HashSet::new();
    for co_id in &new_co_ids {
        if co_id.trim().is_empty() {
            return err(&req.id, "bad_params", "CO ids must not be empty", None);
        }
        if !seen_cos.insert(co_id.as_str()) {
            return err(
                &req.id,
                "bad_params",
                "duplicate CO id",
                Some(json!({ "coId": co_id })),
            );
        }
    }
    if cos.as_array().map(|a| a.len()).unwrap_or(0) != new_co_ids.len() {
        return err(&req.id, "bad_params", "every CO needs an id", None);
    }

    let raw_tools = req
        .params
        .get("assessmentTools")
        .cloned()
        .unwrap_or_else(|| json!([]));
    let mut tool_list: Vec<AssessmentTool> = match serde_json::from_value(raw_tools) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid assessmentTools: {}", e),
                None,
            )
        }
    };

    for tool in &mut tool_list {
        tool.name = tool.derived_name();
    }

    // Improvement tests inherit the configuration of the assessment they
    // override; the per-student mapping happens at marks entry.
    let snapshot = tool_list.clone();
    for tool in &mut tool_list {
        if tool.kind == ToolKind::ImprovementTest && !tool.linked_assessment.is_empty() {
            if let Some(target) = snapshot.iter().find(|t| t.name == tool.linked_assessment) {
                tool.max_marks = target.max_marks;
                tool.weightage = target.weightage;
                tool.co_distribution = target.co_distribution.clone();
            }
        }
    }

    // Cascade: a CO dropped from the definition list disappears from every
    // tool's distribution and from the course's matrix sub-map.
    let removed: Vec<String> = co_ids_of(&course.cos)
        .into_iter()
        .filter(|old| !new_co_ids.contains(old))
        .collect();
    for tool in &mut tool_list {
        for gone in &removed {
            tool.co_distribution.remove(gone);
        }
    }

    let problems = tools::validate_tools(&tool_list);
    if !problems.is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "configuration has errors",
            Some(json!({ "problems": problems })),
        );
    }

    // Merge submitted settings over the stored object so keys managed by
    // other screens (per-CO survey ratings) survive a configuration save.
    let mut settings = course.settings.clone();
    if !settings.is_object() {
        settings = json!({});
    }
    if let Some(submitted) = req.params.get("settings").and_then(|v| v.as_object()) {
        if let Some(map) = settings.as_object_mut() {
            for (k, v) in submitted {
                map.insert(k.clone(), v.clone());
            }
        }
    }

    let tools_json = match serde_json::to_value(&tool_list) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "UPDATE courses SET cos = ?, settings = ?, assessment_tools = ? WHERE id = ?",
        (
            cos.to_string(),
            settings.to_string(),
            tools_json.to_string(),
            &course_id,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    if !removed.is_empty() {
        let raw: Option<String> = match tx
            .query_row(
                "SELECT matrix FROM articulation_matrix WHERE course_id = ?",
                [&course_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        if let Some(raw) = raw {
            let mut matrix: serde_json::Value =
                serde_json::from_str(&raw).unwrap_or_else(|_| json!({}));
            if let Some(map) = matrix.as_object_mut() {
                for gone in &removed {
                    map.remove(gone);
                }
            }
            if let Err(e) = tx.execute(
                "UPDATE articulation_matrix SET matrix = ? WHERE course_id = ?",
                (matrix.to_string(), &course_id),
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

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "removedCos": removed,
            "assessmentTools": tools_json
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.saveConfiguration" => Some(handle_save_configuration(state, req)),
        _ => None,
    }
}
