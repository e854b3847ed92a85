use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("obetrack.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            role TEXT NOT NULL,
            department_id TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_department ON users(department_id)",
        [],
    )?;

    // Structured sub-documents (CO list, assessment tools, settings, faculty
    // assignments) live in JSON text columns; they are edited as whole objects.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            semester INTEGER NOT NULL,
            credits INTEGER NOT NULL,
            department_id TEXT,
            cos TEXT NOT NULL DEFAULT '[]',
            assessment_tools TEXT NOT NULL DEFAULT '[]',
            settings TEXT NOT NULL DEFAULT '{}',
            assigned_faculties TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_department ON courses(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS outcomes(
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            kind TEXT NOT NULL,
            department_id TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS articulation_matrix(
            course_id TEXT PRIMARY KEY,
            matrix TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS configurations(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS surveys(
            department_id TEXT PRIMARY KEY,
            exit_survey TEXT NOT NULL DEFAULT '{}',
            employer_survey TEXT NOT NULL DEFAULT '{}',
            alumni_survey TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            usn TEXT NOT NULL UNIQUE,
            course_ids TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            assessment_name TEXT NOT NULL,
            scores TEXT NOT NULL DEFAULT '{}',
            improvement_test_for TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, course_id, assessment_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_course ON marks(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;

    // Workspaces written before the multi-faculty model carry a single
    // assigned_faculty_id column. Fold it into assigned_faculties once here,
    // instead of special-casing every read.
    ensure_courses_assigned_faculties(&conn)?;
    migrate_single_faculty_assignment(&conn)?;

    Ok(conn)
}

fn ensure_courses_assigned_faculties(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "courses", "assigned_faculties")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE courses ADD COLUMN assigned_faculties TEXT NOT NULL DEFAULT '[]'",
        [],
    )?;
    Ok(())
}

fn migrate_single_faculty_assignment(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "courses", "assigned_faculty_id")? {
        return Ok(());
    }

    let mut stmt = conn.prepare(
        "SELECT id, assigned_faculty_id FROM courses
         WHERE assigned_faculty_id IS NOT NULL
           AND assigned_faculties IN ('[]', '')",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (course_id, faculty_id) in rows {
        let assignments = serde_json::json!([
            { "facultyId": faculty_id, "role": "Course Coordinator" }
        ]);
        conn.execute(
            "UPDATE courses SET assigned_faculties = ?, assigned_faculty_id = NULL WHERE id = ?",
            (assignments.to_string(), &course_id),
        )?;
    }

    conn.execute(
        "UPDATE courses SET assigned_faculty_id = NULL WHERE assigned_faculty_id IS NOT NULL",
        [],
    )?;

    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
