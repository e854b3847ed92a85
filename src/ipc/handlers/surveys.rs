use crate::attain::{OutcomeMap, SurveySet, RATING_SCALE};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
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

fn parse_rating_map(raw: &str) -> OutcomeMap {
    serde_json::from_str(raw).unwrap_or_default()
}

/// A department with no survey record reads as three empty maps.
pub fn load_survey_set(conn: &Connection, department_id: &str) -> rusqlite::Result<SurveySet> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT exit_survey, employer_survey, alumni_survey
             FROM surveys WHERE department_id = ?",
            [department_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    Ok(match row {
        Some((exit_raw, employer_raw, alumni_raw)) => SurveySet {
            exit_survey: parse_rating_map(&exit_raw),
            employer_survey: parse_rating_map(&employer_raw),
            alumni_survey: parse_rating_map(&alumni_raw),
        },
        None => SurveySet::default(),
    })
}

fn handle_surveys_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let department_id = match required_str(req, "departmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let updated_at: Option<String> = match conn
        .query_row(
            "SELECT updated_at FROM surveys WHERE department_id = ?",
            [&department_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v.flatten(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let surveys = match load_survey_set(conn, &department_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "departmentId": department_id,
            "exitSurvey": surveys.exit_survey,
            "employerSurvey": surveys.employer_survey,
            "alumniSurvey": surveys.alumni_survey,
            "updatedAt": updated_at
        }),
    )
}

fn clean_ratings(req: &Request, key: &str) -> Result<OutcomeMap, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Ok(OutcomeMap::new());
    };
    let Some(map) = raw.as_object() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must map outcome ids to ratings", key),
            None,
        ));
    };
    let mut clean = OutcomeMap::new();
    for (outcome_id, rating) in map {
        let Some(n) = rating.as_f64() else {
            continue;
        };
        if n <= 0.0 {
            continue;
        }
        clean.insert(outcome_id.clone(), n.clamp(0.0, RATING_SCALE));
    }
    Ok(clean)
}

fn handle_surveys_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let department_id = match required_str(req, "departmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let dept_exists: Option<i64> = match conn
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
    if dept_exists.is_none() {
        return err(&req.id, "not_found", "department not found", None);
    }

    let exit_survey = match clean_ratings(req, "exitSurvey") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let employer_survey = match clean_ratings(req, "employerSurvey") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let alumni_survey = match clean_ratings(req, "alumniSurvey") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let updated_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO surveys(department_id, exit_survey, employer_survey, alumni_survey, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(department_id) DO UPDATE SET
           exit_survey = excluded.exit_survey,
           employer_survey = excluded.employer_survey,
           alumni_survey = excluded.alumni_survey,
           updated_at = excluded.updated_at",
        (
            &department_id,
            json!(exit_survey).to_string(),
            json!(employer_survey).to_string(),
            json!(alumni_survey).to_string(),
            &updated_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "surveys" })),
        );
    }

    ok(&req.id, json!({ "ok": true, "updatedAt": updated_at }))
}

/// Per-CO exit-survey ratings live on the course settings and feed the
/// indirect term of the course CO attainment report.
fn handle_course_survey_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let ratings = course
        .settings
        .get("indirectAttainment")
        .cloned()
        .unwrap_or_else(|| json!({}));
    ok(
        &req.id,
        json!({ "courseId": course_id, "ratings": ratings }),
    )
}

fn handle_course_survey_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ratings = match clean_ratings(req, "ratings") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let course = match load_course(conn, &course_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut settings = course.settings.clone();
    if !settings.is_object() {
        settings = json!({});
    }
    if let Some(map) = settings.as_object_mut() {
        map.insert("indirectAttainment".to_string(), json!(ratings));
    }

    if let Err(e) = conn.execute(
        "UPDATE courses SET settings = ? WHERE id = ?",
        (settings.to_string(), &course_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "surveys.get" => Some(handle_surveys_get(state, req)),
        "surveys.save" => Some(handle_surveys_save(state, req)),
        "surveys.course.get" => Some(handle_course_survey_get(state, req)),
        "surveys.course.save" => Some(handle_course_survey_save(state, req)),
        _ => None,
    }
}
