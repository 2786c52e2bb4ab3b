use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use super::required;
use crate::{
    errors::{AppError, AppResult},
    middleware::auth_guard::AuthUser,
    models::{Attendance, AttendanceStatus},
    services::attendance::{self, AttendanceChanges, AttendanceFilter, NewAttendance},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/attendance",      get(list_attendance).post(record_attendance))
        .route("/attendance/{id}", put(update_attendance).delete(delete_attendance))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    student_id:    Option<String>,
    enrollment_id: Option<String>,
    class_id:      Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordBody {
    student_id:    Option<String>,
    enrollment_id: Option<String>,
    class_id:      Option<String>,
    session_date:  Option<String>,
    status:        Option<AttendanceStatus>,
    marked_by:     Option<String>,
    notes:         Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody {
    status:       Option<AttendanceStatus>,
    class_id:     Option<String>,
    session_date: Option<String>,
    notes:        Option<String>,
}

async fn list_attendance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Attendance>>> {
    let filter = AttendanceFilter {
        student_id:    user.scope_student(query.student_id)?,
        enrollment_id: query.enrollment_id,
        class_id:      query.class_id,
    };
    Ok(Json(attendance::list(&state.pool, &filter).await?))
}

async fn record_attendance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<RecordBody>,
) -> AppResult<(StatusCode, Json<Attendance>)> {
    user.require_staff()?;

    let new = NewAttendance {
        student_id:    required(body.student_id)?,
        enrollment_id: required(body.enrollment_id)?,
        class_id:      body.class_id,
        session_date:  required(body.session_date)?,
        status:        body.status.ok_or_else(AppError::missing_fields)?,
        // Defaults to the caller when the body leaves it out.
        marked_by:     required(body.marked_by).unwrap_or_else(|_| user.user_id.clone()),
        notes:         body.notes,
    };
    let row = attendance::record(&state.pool, &state.clock, new).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_attendance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> AppResult<Json<Attendance>> {
    user.require_staff()?;

    let changes = AttendanceChanges {
        status:       body.status,
        class_id:     body.class_id,
        session_date: body.session_date,
        notes:        body.notes,
    };
    Ok(Json(attendance::update(&state.pool, &state.clock, &id, changes).await?))
}

async fn delete_attendance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    user.require_staff()?;
    attendance::delete(&state.pool, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
