use axum::http::{Method, StatusCode};
use serde_json::json;

mod common;

#[tokio::test]
async fn lead_time_applies_unless_marked_by_teacher() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;

    // Two hours after the frozen clock.
    let request = json!({
        "studentId": "s1",
        "enrollmentId": id,
        "sessionDate": "2024-01-03T12:00:00",
        "reason": "dentist",
        "markedByTeacher": false,
    });
    let (status, body) = app.staff_post("/absences", request.clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let mut waived = request;
    waived["markedByTeacher"] = json!(true);
    let (status, absence) = app.staff_post("/absences", waived).await;
    assert_eq!(status, StatusCode::CREATED, "{absence}");
    assert_eq!(absence["status"], "approved");

    let (_, rows) = app.staff_get("/attendance?studentId=s1").await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "excused");
    assert_eq!(rows[0]["markedBy"], "s1");
    assert_eq!(rows[0]["sessionDate"], "2024-01-03T12:00:00");

    // Excused outcomes leave the budget alone.
    let (_, enrollment) = app.staff_get(&format!("/enrollments/{id}")).await;
    assert_eq!(enrollment["remainingSessions"], 12);
}

#[tokio::test]
async fn students_cannot_waive_the_lead_time() {
    let app = common::create_test_app().await;
    let student = common::add_user(&app.pool, "s1", "student").await;
    let id = app.enroll("s1", json!({})).await;

    let (status, _) = app
        .send(
            Method::POST,
            "/absences",
            Some(&student),
            Some(json!({
                "studentId": "s1",
                "enrollmentId": id,
                "sessionDate": "2024-01-03T12:00:00",
                "reason": "dentist",
                "markedByTeacher": true,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::POST,
            "/absences",
            Some(&student),
            Some(json!({
                "studentId": "s1",
                "enrollmentId": id,
                "sessionDate": "2024-01-05",
                "reason": "trip",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .send(
            Method::POST,
            "/absences",
            Some(&student),
            Some(json!({
                "studentId": "s2",
                "enrollmentId": id,
                "sessionDate": "2024-01-05",
                "reason": "trip",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn existing_attendance_suppresses_the_companion_row() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;

    let (status, _) = app
        .staff_post(
            "/attendance",
            json!({ "studentId": "s1", "enrollmentId": id, "sessionDate": "2024-01-08", "status": "present" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .staff_post(
            "/absences",
            json!({ "studentId": "s1", "enrollmentId": id, "sessionDate": "2024-01-08", "reason": "sick" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, rows) = app.staff_get("/attendance?studentId=s1").await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "present");
}

#[tokio::test]
async fn one_absence_per_day_and_required_fields() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;
    let request = json!({ "studentId": "s1", "enrollmentId": id, "sessionDate": "2024-01-08", "reason": "sick" });

    let (status, _) = app.staff_post("/absences", request.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = app.staff_post("/absences", request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONFLICT");

    let (status, _) = app
        .staff_post("/absences", json!({ "studentId": "s1", "enrollmentId": id, "sessionDate": "2024-01-09" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, list) = app.staff_get("/absences?studentId=s1").await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}
