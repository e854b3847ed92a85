mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn faculty_assignments_scope_the_course_listing() {
    let workspace = temp_dir("obetrack-assignments");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "departments.create",
        json!({ "id": "D01", "name": "Computer Science" }),
    );

    let faculty = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({ "name": "Asha", "email": "asha@example.edu", "role": "faculty", "departmentId": "D01" }),
    );
    let faculty_id = faculty["userId"].as_str().unwrap().to_string();

    for (id, req_id) in [("C101", "4"), ("C102", "5")] {
        request_ok(
            &mut stdin,
            &mut reader,
            req_id,
            "courses.create",
            json!({
                "id": id,
                "code": id,
                "name": format!("Course {}", id),
                "semester": 3,
                "credits": 4,
                "departmentId": "D01"
            }),
        );
    }

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.assignFaculty",
        json!({
            "courseId": "C101",
            "assignedFaculties": [{ "facultyId": faculty_id, "role": "Course Coordinator" }]
        }),
    );

    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.list",
        json!({ "assignedFacultyId": faculty_id }),
    );
    let courses = mine["courses"].as_array().unwrap();
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0].get("id").and_then(|v| v.as_str()), Some("C101"));
    assert_eq!(
        courses[0]["assignedFaculties"][0]["role"].as_str(),
        Some("Course Coordinator")
    );

    // Assigning an unknown or non-faculty user is rejected outright.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "courses.assignFaculty",
        json!({
            "courseId": "C102",
            "assignedFaculties": [{ "facultyId": "nobody", "role": "Course Coordinator" }]
        }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));

    // Course deletion cleans its matrix row and marks.
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "courses.delete",
        json!({ "courseId": "C101" }),
    );
    let remaining = request_ok(&mut stdin, &mut reader, "10", "courses.list", json!({}));
    assert_eq!(remaining["courses"].as_array().unwrap().len(), 1);
}
