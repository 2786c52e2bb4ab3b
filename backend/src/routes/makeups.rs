use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use super::required;
use crate::{
    errors::AppResult,
    middleware::auth_guard::AuthUser,
    models::{MakeupRequest, RequestStatus},
    services::{
        enrollments,
        makeups::{self, AvailableSlot, MakeupFilter, NewMakeup},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/makeups",           get(list_makeups).post(create_makeup))
        .route("/makeups/available", get(available_slots))
        .route("/makeups/{id}",      put(schedule_makeup))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    student_id: Option<String>,
    status:     Option<RequestStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailableQuery {
    enrollment_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMakeupBody {
    student_id:            Option<String>,
    enrollment_id:         Option<String>,
    original_class_id:     Option<String>,
    original_session_date: Option<String>,
    new_class_id:          Option<String>,
    new_session_date:      Option<String>,
    reason:                Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleMakeupBody {
    new_class_id:     Option<String>,
    new_session_date: Option<String>,
}

async fn list_makeups(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<MakeupRequest>>> {
    let filter = MakeupFilter {
        student_id: user.scope_student(query.student_id)?,
        status:     query.status,
    };
    Ok(Json(makeups::list(&state.pool, &filter).await?))
}

async fn create_makeup(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateMakeupBody>,
) -> AppResult<(StatusCode, Json<MakeupRequest>)> {
    let student_id = required(body.student_id)?;
    user.require_self_or_staff(&student_id)?;

    let new = NewMakeup {
        student_id,
        enrollment_id:         required(body.enrollment_id)?,
        original_class_id:     body.original_class_id,
        original_session_date: required(body.original_session_date)?,
        new_class_id:          body.new_class_id,
        new_session_date:      required(body.new_session_date)?,
        reason:                required(body.reason)?,
    };

    let row = makeups::create(&state.pool, &state.clock, state.config.makeup_lead_hours, new).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn available_slots(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AvailableQuery>,
) -> AppResult<Json<Vec<AvailableSlot>>> {
    let enrollment_id = required(query.enrollment_id)?;
    let enrollment = enrollments::get(&state.pool, &enrollment_id).await?;
    user.require_self_or_staff(&enrollment.student_id)?;

    let slots = makeups::available_slots(
        &state.pool,
        &state.clock,
        state.config.makeup_lead_hours,
        &enrollment_id,
    )
    .await?;
    Ok(Json(slots))
}

async fn schedule_makeup(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleMakeupBody>,
) -> AppResult<Json<MakeupRequest>> {
    let new_session_date = required(body.new_session_date)?;

    let current = makeups::get(&state.pool, &id).await?;
    user.require_self_or_staff(&current.student_id)?;

    let row = makeups::schedule_pending(
        &state.pool,
        &state.clock,
        state.config.makeup_lead_hours,
        &id,
        body.new_class_id.as_deref(),
        &new_session_date,
    )
    .await?;
    Ok(Json(row))
}
