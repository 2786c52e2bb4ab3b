use axum::http::{Method, StatusCode};
use serde_json::json;

mod common;

fn assert_budget_balanced(enrollment: &serde_json::Value) {
    let total = enrollment["totalSessions"].as_i64().unwrap();
    let completed = enrollment["completedSessions"].as_i64().unwrap();
    let remaining = enrollment["remainingSessions"].as_i64().unwrap();
    assert_eq!(total, completed + remaining, "{enrollment}");
}

#[tokio::test]
async fn default_plan_twice_weekly_runs_nine_weeks() {
    let app = common::create_test_app().await;

    let (status, body) = app
        .staff_post(
            "/enrollments",
            json!({
                "studentId": "s1",
                "courseId": "piano",
                "frequency": 2,
                "startDate": "2024-01-01",
                "paymentMode": "default",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["totalSessions"], 12);
    assert_eq!(body["remainingSessions"], 12);
    assert_eq!(body["completedSessions"], 0);
    assert_eq!(body["endDate"], "2024-03-04");
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn custom_plan_scales_with_weeks() {
    let app = common::create_test_app().await;

    let (status, body) = app
        .staff_post(
            "/enrollments",
            json!({
                "studentId": "s1",
                "courseId": "piano",
                "frequency": 1,
                "startDate": "2024-01-01",
                "paymentMode": "custom",
                "customWeeks": 10,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["totalSessions"], 10);
    assert_eq!(body["endDate"], "2024-03-11");
    assert_budget_balanced(&body);
}

#[tokio::test]
async fn missing_fields_and_bad_frequency_are_rejected() {
    let app = common::create_test_app().await;

    let (status, body) = app
        .staff_post("/enrollments", json!({ "studentId": "s1", "courseId": "piano" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = app
        .staff_post(
            "/enrollments",
            json!({ "studentId": "s1", "courseId": "piano", "frequency": 3, "startDate": "2024-01-01" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .staff_post(
            "/enrollments",
            json!({ "studentId": "s1", "courseId": "piano", "frequency": 1, "startDate": "01/01/2024" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn second_open_enrollment_for_a_student_is_rejected() {
    let app = common::create_test_app().await;
    app.enroll("s1", json!({})).await;

    let (status, body) = app
        .staff_post(
            "/enrollments",
            json!({ "studentId": "s1", "courseId": "violin", "frequency": 2, "startDate": "2024-02-01" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONFLICT");

    let (_, list) = app.staff_get("/enrollments?studentId=s1").await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn payment_mode_change_recomputes_budget_and_end_date() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({ "frequency": 2 })).await;

    // Draw two sessions first.
    for day in ["2024-01-01", "2024-01-02"] {
        let (status, body) = app
            .staff_post(
                "/attendance",
                json!({ "studentId": "s1", "enrollmentId": id, "sessionDate": day, "status": "present" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let (status, body) = app
        .staff_put(&format!("/enrollments/{id}"), json!({ "paymentMode": "custom", "customWeeks": 3 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["totalSessions"], 6);
    assert_eq!(body["completedSessions"], 2);
    assert_eq!(body["remainingSessions"], 4);
    assert_eq!(body["endDate"], "2024-01-22");
    assert_budget_balanced(&body);

    // Shrinking below what was already used floors remaining at zero.
    let (status, body) = app
        .staff_put(&format!("/enrollments/{id}"), json!({ "customWeeks": 1, "frequency": 1 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["totalSessions"], 1);
    assert_eq!(body["completedSessions"], 2);
    assert_eq!(body["remainingSessions"], 0);
}

#[tokio::test]
async fn start_date_change_moves_end_date_only() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;

    let (status, body) = app
        .staff_put(&format!("/enrollments/{id}"), json!({ "startDate": "2024-02-05" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["startDate"], "2024-02-05");
    assert_eq!(body["endDate"], "2024-06-10");
    assert_eq!(body["totalSessions"], 12);
    assert_eq!(body["remainingSessions"], 12);
}

#[tokio::test]
async fn renew_completes_source_and_opens_successor() {
    let app = common::create_test_app().await;
    let id = app
        .enroll(
            "s1",
            json!({
                "frequency": 2,
                "cycle": 3,
                "schedule": [{ "dayOfWeek": 1, "timeSlot": "16:00-17:00" }],
            }),
        )
        .await;

    let (status, successor) = app.staff_post(&format!("/enrollments/{id}/renew"), json!({})).await;
    assert_eq!(status, StatusCode::CREATED, "{successor}");
    assert_eq!(successor["startDate"], "2024-03-05");
    assert_eq!(successor["endDate"], "2024-05-07");
    assert_eq!(successor["status"], "pending");
    assert_eq!(successor["cycle"], 3);
    assert_eq!(successor["frequency"], 2);
    assert_eq!(successor["schedule"][0]["dayOfWeek"], 1);

    let (_, source) = app.staff_get(&format!("/enrollments/{id}")).await;
    assert_eq!(source["status"], "completed");

    let (status, _) = app.staff_post("/enrollments/missing/renew", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn renew_is_rejected_when_another_enrollment_is_open() {
    let app = common::create_test_app().await;
    let first = app.enroll("s1", json!({})).await;

    let (status, _) = app
        .staff_put(&format!("/enrollments/{first}"), json!({ "status": "completed" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    app.enroll("s1", json!({ "courseId": "violin" })).await;

    let (status, body) = app.staff_post(&format!("/enrollments/{first}/renew"), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONFLICT");

    // The failed renewal left the source untouched.
    let (_, source) = app.staff_get(&format!("/enrollments/{first}")).await;
    assert_eq!(source["status"], "completed");
}

#[tokio::test]
async fn bonus_sessions_and_weeks_are_independent() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({ "frequency": 2 })).await;

    let (status, body) = app
        .staff_post(&format!("/enrollments/{id}/bonus"), json!({ "bonusSessions": 2 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["remainingSessions"], 14);
    assert_eq!(body["endDate"], "2024-03-04");

    let (status, body) = app
        .staff_post(&format!("/enrollments/{id}/bonus"), json!({ "bonusWeeks": 2 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["remainingSessions"], 14);
    assert_eq!(body["totalSessions"], 12);
    assert_eq!(body["endDate"], "2024-03-18");

    let (status, _) = app.staff_post(&format!("/enrollments/{id}/bonus"), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .staff_post(&format!("/enrollments/{id}/bonus"), json!({ "bonusSessions": -1 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_week_counts_are_rejected() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;

    let (status, body) = app
        .staff_post(&format!("/enrollments/{id}/bonus"), json!({ "bonusWeeks": 100_000_000 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .staff_put(
            &format!("/enrollments/{id}"),
            json!({ "paymentMode": "custom", "customWeeks": 100_000_000 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = app
        .staff_post(
            "/enrollments",
            json!({
                "studentId": "s2",
                "courseId": "piano",
                "frequency": 1,
                "startDate": "2024-01-01",
                "paymentMode": "custom",
                "customWeeks": 100_000_000,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    // Nothing moved.
    let (_, current) = app.staff_get(&format!("/enrollments/{id}")).await;
    assert_eq!(current["endDate"], "2024-05-06");
    assert_eq!(current["paymentMode"], "default");
    let (_, all) = app.staff_get("/enrollments?studentId=s2").await;
    assert!(all.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn list_filters_by_course_and_status() {
    let app = common::create_test_app().await;
    app.enroll("s1", json!({})).await;
    app.enroll("s2", json!({ "courseId": "violin" })).await;

    let (_, piano) = app.staff_get("/enrollments?courseId=piano").await;
    assert_eq!(piano.as_array().unwrap().len(), 1);
    assert_eq!(piano[0]["studentId"], "s1");

    let (_, pending) = app.staff_get("/enrollments?status=pending").await;
    assert_eq!(pending.as_array().unwrap().len(), 2);

    let (_, active) = app.staff_get("/enrollments?status=active").await;
    assert!(active.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn students_only_see_their_own_enrollments() {
    let app = common::create_test_app().await;
    let student = common::add_user(&app.pool, "s1", "student").await;
    app.enroll("s1", json!({})).await;
    let other = app.enroll("s2", json!({})).await;

    let (status, list) = app.send(Method::GET, "/enrollments", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["studentId"], "s1");

    let (status, _) = app
        .send(Method::GET, &format!("/enrollments/{other}"), Some(&student), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            Method::POST,
            "/enrollments",
            Some(&student),
            Some(json!({ "studentId": "s1", "courseId": "x", "frequency": 1, "startDate": "2024-01-01" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
