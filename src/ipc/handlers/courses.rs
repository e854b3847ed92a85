use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
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

#[derive(Debug, Clone)]
pub struct CourseRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub semester: i64,
    pub credits: i64,
    pub department_id: Option<String>,
    pub cos: serde_json::Value,
    pub assessment_tools: serde_json::Value,
    pub settings: serde_json::Value,
    pub assigned_faculties: serde_json::Value,
}

impl CourseRow {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "code": self.code,
            "name": self.name,
            "semester": self.semester,
            "credits": self.credits,
            "departmentId": self.department_id,
            "cos": self.cos,
            "assessmentTools": self.assessment_tools,
            "settings": self.settings,
            "assignedFaculties": self.assigned_faculties
        })
    }
}

fn parse_json_column(raw: String, fallback: serde_json::Value) -> serde_json::Value {
    serde_json::from_str(&raw).unwrap_or(fallback)
}

fn row_to_course(row: &rusqlite::Row<'_>) -> rusqlite::Result<CourseRow> {
    Ok(CourseRow {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        semester: row.get(3)?,
        credits: row.get(4)?,
        department_id: row.get(5)?,
        cos: parse_json_column(row.get(6)?, json!([])),
        assessment_tools: parse_json_column(row.get(7)?, json!([])),
        settings: parse_json_column(row.get(8)?, json!({})),
        assigned_faculties: parse_json_column(row.get(9)?, json!([])),
    })
}

const COURSE_COLUMNS: &str =
    "id, code, name, semester, credits, department_id, cos, assessment_tools, settings, assigned_faculties";

pub fn load_course(
    conn: &Connection,
    course_id: &str,
) -> rusqlite::Result<Option<CourseRow>> {
    conn.query_row(
        &format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS),
        [course_id],
        |row| row_to_course(row),
    )
    .optional()
}

pub fn load_courses(
    conn: &Connection,
    department_id: Option<&str>,
) -> rusqlite::Result<Vec<CourseRow>> {
    let (sql, binds): (String, Vec<Value>) = match department_id {
        Some(dept) => (
            format!(
                "SELECT {} FROM courses WHERE department_id = ? ORDER BY semester, code",
                COURSE_COLUMNS
            ),
            vec![Value::Text(dept.to_string())],
        ),
        None => (
            format!(
                "SELECT {} FROM courses ORDER BY semester, code",
                COURSE_COLUMNS
            ),
            Vec::new(),
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |row| row_to_course(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn is_assigned_to(course: &CourseRow, faculty_id: &str) -> bool {
    course
        .assigned_faculties
        .as_array()
        .map(|arr| {
            arr.iter().any(|a| {
                a.get("facultyId").and_then(|v| v.as_str()) == Some(faculty_id)
            })
        })
        .unwrap_or(false)
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    let department_id = req.params.get("departmentId").and_then(|v| v.as_str());
    let assigned_faculty_id = req.params.get("assignedFacultyId").and_then(|v| v.as_str());

    let mut courses = match load_courses(conn, department_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Some(faculty_id) = assigned_faculty_id {
        courses.retain(|c| is_assigned_to(c, faculty_id));
    }

    let courses: Vec<serde_json::Value> = courses.iter().map(|c| c.to_json()).collect();
    ok(&req.id, json!({ "courses": courses }))
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let code = match required_str(req, "code") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if code.is_empty() || name.is_empty() {
        return err(&req.id, "bad_params", "code/name must not be empty", None);
    }
    let Some(semester) = req.params.get("semester").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing semester", None);
    };
    let Some(credits) = req.params.get("credits").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing credits", None);
    };

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

    let course_id = match req.params.get("id").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => format!("C{}", Uuid::new_v4().simple()),
    };

    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, code, name, semester, credits, department_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &course_id,
            &code,
            &name,
            semester,
            credits,
            department_id.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id }))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    for field in ["code", "name"] {
        if let Some(v) = patch.get(field) {
            let Some(s) = v.as_str() else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string", field),
                    None,
                );
            };
            let s = s.trim().to_string();
            if s.is_empty() {
                return err(
                    &req.id,
                    "bad_params",
                    format!("{} must not be empty", field),
                    None,
                );
            }
            set_parts.push(format!("{} = ?", field));
            bind_values.push(Value::Text(s));
        }
    }
    for field in ["semester", "credits"] {
        if let Some(v) = patch.get(field) {
            let Some(n) = v.as_i64() else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be an integer", field),
                    None,
                );
            };
            set_parts.push(format!("{} = ?", field));
            bind_values.push(Value::Integer(n));
        }
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

    let sql = format!("UPDATE courses SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(course_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "courses" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "course not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM marks WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM articulation_matrix WHERE course_id = ?",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "articulation_matrix" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM courses WHERE id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_courses_assign_faculty(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(assignments) = req.params.get("assignedFaculties").and_then(|v| v.as_array())
    else {
        return err(&req.id, "bad_params", "missing/invalid assignedFaculties", None);
    };

    let mut normalized: Vec<serde_json::Value> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let Some(faculty_id) = assignment.get("facultyId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                "assignedFaculties entries need a facultyId",
                None,
            );
        };
        let role = assignment
            .get("role")
            .and_then(|v| v.as_str())
            .unwrap_or("Course Coordinator");

        let exists: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM users WHERE id = ? AND role = 'faculty'",
                [faculty_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(
                &req.id,
                "not_found",
                "faculty user not found",
                Some(json!({ "facultyId": faculty_id })),
            );
        }

        normalized.push(json!({ "facultyId": faculty_id, "role": role }));
    }

    let changed = match conn.execute(
        "UPDATE courses SET assigned_faculties = ? WHERE id = ?",
        (json!(normalized).to_string(), &course_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "courses" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "course not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        "courses.assignFaculty" => Some(handle_courses_assign_faculty(state, req)),
        _ => None,
    }
}
