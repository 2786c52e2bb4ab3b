use axum::http::{Method, StatusCode};
use serde_json::json;

use classledger_backend::{calendar::CalendarDay, services::deferral};

mod common;

fn mondays_and_thursdays() -> serde_json::Value {
    json!({
        "schedule": [
            { "dayOfWeek": 1, "timeSlot": "16:00-17:00" },
            { "dayOfWeek": 4, "timeSlot": "16:00-17:00" },
        ],
    })
}

#[tokio::test]
async fn deferral_extends_end_date_and_backfills_absences() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", mondays_and_thursdays()).await;

    let (status, body) = app
        .staff_patch(&format!("/enrollments/{id}"), json!({ "deferralWeeks": 2 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "deferred");
    assert_eq!(body["deferralWeeks"], 2);
    assert_eq!(body["endDate"], "2024-05-20");
    assert_eq!(body["deferredUntil"], "2024-01-17");
    assert_eq!(body["absencesCreated"], 4);

    let (_, absences) = app.staff_get("/absences?studentId=s1").await;
    let mut dates: Vec<String> = absences
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["sessionDate"].as_str().unwrap().to_string())
        .collect();
    dates.sort();
    assert_eq!(
        dates,
        vec![
            "2024-01-04T00:00:00",
            "2024-01-08T00:00:00",
            "2024-01-11T00:00:00",
            "2024-01-15T00:00:00",
        ]
    );
    assert!(absences
        .as_array()
        .unwrap()
        .iter()
        .all(|a| a["reason"] == "deferred 2 weeks" && a["status"] == "approved"));
}

#[tokio::test]
async fn second_deferral_is_rejected_and_end_date_is_kept() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", mondays_and_thursdays()).await;
    let uri = format!("/enrollments/{id}");

    let (status, first) = app.staff_patch(&uri, json!({ "deferralWeeks": 1 })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.staff_patch(&uri, json!({ "deferralWeeks": 1 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONFLICT");

    let (_, current) = app.staff_get(&uri).await;
    assert_eq!(current["endDate"], first["endDate"]);
    assert_eq!(current["deferralWeeks"], 1);
}

#[tokio::test]
async fn deferral_weeks_must_be_between_one_and_four() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;
    let uri = format!("/enrollments/{id}");

    for weeks in [0, 5] {
        let (status, _) = app.staff_patch(&uri, json!({ "deferralWeeks": weeks })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, _) = app.staff_patch(&uri, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, current) = app.staff_get(&uri).await;
    assert_eq!(current["status"], "pending");
    assert_eq!(current["endDate"], "2024-05-06");
}

#[tokio::test]
async fn existing_absences_are_not_duplicated() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", mondays_and_thursdays()).await;

    let (status, _) = app
        .staff_post(
            "/absences",
            json!({ "studentId": "s1", "enrollmentId": id, "sessionDate": "2024-01-08", "reason": "sick" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = app
        .staff_patch(&format!("/enrollments/{id}"), json!({ "deferralWeeks": 1 }))
        .await;
    assert_eq!(body["absencesCreated"], 1);

    let (_, absences) = app.staff_get("/absences?studentId=s1").await;
    assert_eq!(absences.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn class_start_time_is_used_when_the_schedule_names_a_class() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;
    let class_id = app.monday_class("Mon", 4).await;
    let (status, _) = app
        .staff_post(&format!("/classes/{class_id}/students"), json!({ "studentId": "s1" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .staff_patch(&format!("/enrollments/{id}"), json!({ "deferralWeeks": 1 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, absences) = app.staff_get("/absences?studentId=s1").await;
    assert_eq!(absences[0]["sessionDate"], "2024-01-08T16:00:00");
    assert_eq!(absences[0]["classId"], json!(class_id));
}

#[tokio::test]
async fn students_may_defer_their_own_enrollment_only() {
    let app = common::create_test_app().await;
    let student = common::add_user(&app.pool, "s1", "student").await;
    let own = app.enroll("s1", json!({})).await;
    let other = app.enroll("s2", json!({})).await;

    let (status, _) = app
        .send(Method::PATCH, &format!("/enrollments/{other}"), Some(&student), Some(json!({ "deferralWeeks": 1 })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::PATCH, &format!("/enrollments/{own}"), Some(&student), Some(json!({ "deferralWeeks": 1 })))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn sweep_resumes_elapsed_deferrals() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;
    let class_id = app.monday_class("Mon", 4).await;
    let (status, _) = app
        .staff_post(&format!("/classes/{class_id}/students"), json!({ "studentId": "s1" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .staff_patch(&format!("/enrollments/{id}"), json!({ "deferralWeeks": 1 }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let before = CalendarDay::parse("2024-01-09").unwrap();
    assert_eq!(deferral::resume_elapsed_deferrals(&app.pool, before).await.unwrap(), 0);

    let after = CalendarDay::parse("2024-01-10").unwrap();
    assert_eq!(deferral::resume_elapsed_deferrals(&app.pool, after).await.unwrap(), 1);

    let (_, current) = app.staff_get(&format!("/enrollments/{id}")).await;
    assert_eq!(current["status"], "active");
    assert!(current["deferredUntil"].is_null());
    assert_eq!(current["deferralWeeks"], 1);
}

#[tokio::test]
async fn sweep_keeps_unplaced_enrollment_pending() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;

    let (status, _) = app
        .staff_patch(&format!("/enrollments/{id}"), json!({ "deferralWeeks": 1 }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let after = CalendarDay::parse("2024-02-01").unwrap();
    assert_eq!(deferral::resume_elapsed_deferrals(&app.pool, after).await.unwrap(), 1);

    // Never placed in a class, so it goes back to pending, not active.
    let (_, current) = app.staff_get(&format!("/enrollments/{id}")).await;
    assert_eq!(current["status"], "pending");
    assert!(current["deferredUntil"].is_null());
}

#[tokio::test]
async fn sweep_leaves_deferral_in_place_when_student_reenrolled() {
    let app = common::create_test_app().await;
    let id = app.enroll("s1", json!({})).await;
    app.staff_patch(&format!("/enrollments/{id}"), json!({ "deferralWeeks": 1 })).await;

    // A deferred enrollment no longer blocks a new one.
    app.enroll("s1", json!({ "courseId": "violin" })).await;

    let after = CalendarDay::parse("2024-01-10").unwrap();
    assert_eq!(deferral::resume_elapsed_deferrals(&app.pool, after).await.unwrap(), 0);

    let (_, current) = app.staff_get(&format!("/enrollments/{id}")).await;
    assert_eq!(current["status"], "deferred");
}
