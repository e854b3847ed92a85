use crate::attain::{self, CourseMatrix, SurveySet};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::tools::{AssessmentTool, ToolKind};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

use super::config::load_global_config;
use super::courses::{load_course, load_courses, CourseRow};
use super::marks::load_mark_records;
use super::outcomes::{load_outcome_ids, load_outcomes};
use super::surveys::load_survey_set;

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

fn load_matrix_map(conn: &Connection) -> rusqlite::Result<HashMap<String, CourseMatrix>> {
    let mut stmt = conn.prepare("SELECT course_id, matrix FROM articulation_matrix")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut map = HashMap::new();
    for (course_id, raw) in rows {
        let matrix: CourseMatrix = serde_json::from_str(&raw).unwrap_or_default();
        map.insert(course_id, matrix);
    }
    Ok(map)
}

fn course_matrix(conn: &Connection, course_id: &str) -> rusqlite::Result<CourseMatrix> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT matrix FROM articulation_matrix WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw
        .and_then(|r| serde_json::from_str(&r).ok())
        .unwrap_or_default())
}

fn co_ids_of(course: &CourseRow) -> Vec<String> {
    course
        .cos
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|co| co.get("id").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn course_tools(course: &CourseRow) -> Vec<AssessmentTool> {
    let mut tools: Vec<AssessmentTool> =
        serde_json::from_value(course.assessment_tools.clone()).unwrap_or_default();
    // Stored records may predate the tagged parts; the name wins.
    for tool in &mut tools {
        tool.normalize();
    }
    tools
}

/// The department-level "Result of Evaluation" table: one averages row per
/// course, then the direct / survey / indirect / weighted / total summary.
fn handle_department(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let outcome_ids = match load_outcome_ids(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let courses = match load_courses(conn, Some(&department_id)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let matrix_map = match load_matrix_map(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let config = match load_global_config(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let surveys = match load_survey_set(conn, &department_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut per_course = Vec::new();
    let mut course_rows = Vec::new();
    for course in &courses {
        let averages = matrix_map
            .get(&course.id)
            .map(|m| attain::course_outcome_averages(m, &outcome_ids))
            .unwrap_or_default();
        course_rows.push(json!({
            "courseId": course.id,
            "code": course.code,
            "name": course.name,
            "semester": course.semester,
            "averages": averages
        }));
        per_course.push(averages);
    }

    let direct = attain::direct_attainment(&per_course, &outcome_ids);
    let indirect = attain::indirect_attainment(&surveys, &outcome_ids);
    let summary = attain::evaluation_summary(
        &direct,
        &indirect,
        &config.attainment_rules,
        &outcome_ids,
    );

    ok(
        &req.id,
        json!({
            "departmentId": department_id,
            "outcomes": outcome_ids,
            "courseRows": course_rows,
            "surveys": {
                "exitSurvey": surveys.exit_survey,
                "employerSurvey": surveys.employer_survey,
                "alumniSurvey": surveys.alumni_survey
            },
            "summary": summary
        }),
    )
}

/// Outcomes whose combined attainment falls below the improvement threshold,
/// each paired with its suggestion list.
fn handle_improvement(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let department_id = req
        .params
        .get("departmentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let outcomes = match load_outcomes(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let outcome_ids: Vec<String> = outcomes.iter().map(|o| o.id.clone()).collect();
    let courses = match load_courses(conn, department_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let matrix_map = match load_matrix_map(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let config = match load_global_config(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let surveys = match &department_id {
        Some(dept) => match load_survey_set(conn, dept) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        None => SurveySet::default(),
    };

    let per_course: Vec<_> = courses
        .iter()
        .filter_map(|course| matrix_map.get(&course.id))
        .map(|m| attain::course_outcome_averages(m, &outcome_ids))
        .collect();
    let direct = attain::direct_attainment(&per_course, &outcome_ids);
    let indirect = attain::indirect_attainment(&surveys, &outcome_ids);
    let summary = attain::evaluation_summary(
        &direct,
        &indirect,
        &config.attainment_rules,
        &outcome_ids,
    );

    let mut low_performers = Vec::new();
    for outcome in &outcomes {
        let total = summary.total.get(&outcome.id).copied().unwrap_or(0.0);
        if total < attain::IMPROVEMENT_THRESHOLD {
            low_performers.push(json!({
                "id": outcome.id,
                "description": outcome.description,
                "attained": total,
                "suggestions": attain::improvement_suggestions(&outcome.id)
            }));
        }
    }

    ok(
        &req.id,
        json!({
            "threshold": attain::IMPROVEMENT_THRESHOLD,
            "lowPerformers": low_performers
        }),
    )
}

/// Per-CO levels from the course's mark records, plus the PO attainment the
/// score indices produce through the articulation matrix.
fn handle_course(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let config = match load_global_config(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let marks = match load_mark_records(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let matrix = match course_matrix(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let co_ids = co_ids_of(&course);
    let tools = course_tools(&course);
    let indirect_by_co: attain::OutcomeMap = course
        .settings
        .get("indirectAttainment")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let co_rows = attain::course_co_attainment(
        &co_ids,
        &tools,
        &marks,
        &indirect_by_co,
        &config.attainment_rules,
    );
    let po_rows = attain::course_po_attainment(&matrix, &co_rows);

    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "coAttainment": co_rows,
            "poAttainment": po_rows
        }),
    )
}

/// Plain obtained/max percentages per student. The raw ratio is reported
/// as-is; no rescaling onto the rating scale.
fn handle_student_report(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let tools = course_tools(&course);
    let graded: Vec<&AssessmentTool> = tools
        .iter()
        .filter(|t| t.kind != ToolKind::ImprovementTest)
        .collect();
    let max_total: f64 = graded.iter().map(|t| t.max_marks).sum();

    let marks = match load_mark_records(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare("SELECT id, name, usn, course_ids FROM students ORDER BY usn")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let usn: String = row.get(2)?;
            let raw_courses: String = row.get(3)?;
            let course_ids: Vec<String> =
                serde_json::from_str(&raw_courses).unwrap_or_default();
            Ok((id, name, usn, course_ids))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let students = match students {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows = Vec::new();
    for (student_id, name, usn, course_ids) in students {
        if !course_ids.iter().any(|c| c == &course_id) {
            continue;
        }
        let obtained: f64 = marks
            .iter()
            .filter(|m| {
                m.student_id == student_id
                    && graded.iter().any(|t| t.name == m.assessment_name)
            })
            .flat_map(|m| m.scores.iter())
            .filter(|(k, _)| !k.starts_with('_'))
            .filter_map(|(_, v)| attain::numeric_score(v))
            .sum();
        let percentage = if max_total > 0.0 {
            obtained / max_total * 100.0
        } else {
            0.0
        };
        rows.push(json!({
            "studentId": student_id,
            "name": name,
            "usn": usn,
            "obtained": obtained,
            "maxMarks": max_total,
            "percentage": percentage
        }));
    }

    ok(
        &req.id,
        json!({ "courseId": course_id, "students": rows }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attainment.department" => Some(handle_department(state, req)),
        "attainment.improvement" => Some(handle_improvement(state, req)),
        "attainment.course" => Some(handle_course(state, req)),
        "attainment.studentReport" => Some(handle_student_report(state, req)),
        _ => None,
    }
}
