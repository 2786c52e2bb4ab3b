#![allow(dead_code)]

use std::str::FromStr;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower::ServiceExt;

use classledger_backend::{
    auth::{generate_token, hash_session_token},
    build_app,
    calendar::Clock,
    config::Config,
    db::{self, Db},
    state::AppState,
};

pub const SECRET: &str = "test-session-secret";

pub struct TestApp {
    pub router: Router,
    pub pool:   Db,
    /// Session token of a seeded teacher.
    pub staff:  String,
}

/// Wednesday 2024-01-03 10:00, school time (UTC).
pub fn frozen_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 3)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

fn test_config() -> Config {
    Config {
        database_url:                    "sqlite::memory:".into(),
        backend_host:                    "127.0.0.1".into(),
        backend_port:                    0,
        session_secret:                  SECRET.into(),
        school_utc_offset:               FixedOffset::east_opt(0).unwrap(),
        absence_lead_hours:              6,
        makeup_lead_hours:               24,
        deferral_sweep_enabled:          false,
        deferral_sweep_interval_minutes: 60,
        dev_session_token:               None,
        app_env:                         "test".into(),
    }
}

/// A single-connection in-memory database; the connection is never recycled,
/// so the schema lives for the whole test.
pub async fn memory_pool() -> Db {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub async fn create_test_app() -> TestApp {
    let pool = memory_pool().await;
    let config = test_config();
    let clock = Clock::pinned(config.school_utc_offset, frozen_now());
    let state = AppState { pool: pool.clone(), config, clock };

    let staff = add_user(&pool, "teacher-1", "teacher").await;
    TestApp { router: build_app(state), pool, staff }
}

/// Insert a user with a live session and return the session token.
pub async fn add_user(pool: &Db, id: &str, role: &str) -> String {
    sqlx::query("INSERT INTO users (id, display_name, role) VALUES (?, ?, ?)")
        .bind(id)
        .bind(id)
        .bind(role)
        .execute(pool)
        .await
        .unwrap();

    let token = generate_token();
    let expires = NaiveDate::from_ymd_opt(2099, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    sqlx::query("INSERT INTO user_sessions (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)")
        .bind(format!("session-{id}"))
        .bind(id)
        .bind(hash_session_token(SECRET, &token))
        .bind(expires)
        .execute(pool)
        .await
        .unwrap();
    token
}

impl TestApp {
    pub async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(format!("/api/v1{uri}"));
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("session={token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn staff_get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(&self.staff), None).await
    }

    pub async fn staff_post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(&self.staff), Some(body)).await
    }

    pub async fn staff_put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(&self.staff), Some(body)).await
    }

    pub async fn staff_patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PATCH, uri, Some(&self.staff), Some(body)).await
    }

    pub async fn staff_delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::DELETE, uri, Some(&self.staff), None).await
    }

    /// Create a default-mode enrollment and return its id.
    pub async fn enroll(&self, student_id: &str, body: Value) -> String {
        let mut payload = serde_json::json!({
            "studentId": student_id,
            "courseId": "piano",
            "frequency": 1,
            "startDate": "2024-01-01",
        });
        if let (Some(extra), Some(target)) = (body.as_object(), payload.as_object_mut()) {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
        let (status, created) = self.staff_post("/enrollments", payload).await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        created["id"].as_str().unwrap().to_string()
    }

    /// Create a class meeting Mondays 16:00-17:00 and return its id.
    pub async fn monday_class(&self, name: &str, max_students: i64) -> String {
        let (status, created) = self
            .staff_post(
                "/classes",
                serde_json::json!({
                    "name": name,
                    "grade": "beginner",
                    "courseId": "piano",
                    "maxStudents": max_students,
                    "sessions": [{ "dayOfWeek": 1, "startTime": "16:00", "endTime": "17:00" }],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        created["id"].as_str().unwrap().to_string()
    }
}
