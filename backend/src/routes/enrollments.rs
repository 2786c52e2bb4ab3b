//! `/enrollments` routes: session budgets, renewal, bonus grants and deferral.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use super::{parse_day, required};
use crate::{
    errors::{AppError, AppResult},
    middleware::auth_guard::AuthUser,
    models::{Enrollment, EnrollmentStatus, PaymentMode, ScheduleEntry},
    services::{
        deferral::{self, DeferralOutcome},
        enrollments::{self, EnrollmentChanges, EnrollmentFilter, NewEnrollment},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/enrollments",             get(list_enrollments).post(create_enrollment))
        .route("/enrollments/{id}",        get(get_enrollment).put(update_enrollment).patch(defer_enrollment))
        .route("/enrollments/{id}/renew",  post(renew_enrollment))
        .route("/enrollments/{id}/bonus",  post(add_bonus))
}

// ── Request bodies ───────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    student_id: Option<String>,
    course_id:  Option<String>,
    status:     Option<EnrollmentStatus>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateEnrollmentBody {
    student_id:   Option<String>,
    course_id:    Option<String>,
    #[validate(range(min = 1, max = 2))]
    frequency:    Option<i64>,
    start_date:   Option<String>,
    #[serde(default)]
    schedule:     Vec<ScheduleEntry>,
    payment_mode: Option<PaymentMode>,
    #[validate(range(min = 1, max = 520))]
    custom_weeks: Option<i64>,
    #[validate(range(min = 1))]
    cycle:        Option<i64>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateEnrollmentBody {
    #[validate(range(min = 1, max = 2))]
    frequency:    Option<i64>,
    start_date:   Option<String>,
    payment_mode: Option<PaymentMode>,
    #[validate(range(min = 1, max = 520))]
    custom_weeks: Option<i64>,
    schedule:     Option<Vec<ScheduleEntry>>,
    status:       Option<EnrollmentStatus>,
    #[validate(range(min = 1))]
    cycle:        Option<i64>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct DeferBody {
    #[validate(range(min = 1, max = 4))]
    deferral_weeks: Option<i64>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct BonusBody {
    #[validate(range(min = 0, max = 1000))]
    bonus_sessions: Option<i64>,
    #[validate(range(min = 0, max = 520))]
    bonus_weeks:    Option<i64>,
}

// ── Handlers ─────────────────────────────────────────────────

async fn list_enrollments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Enrollment>>> {
    let filter = EnrollmentFilter {
        student_id: user.scope_student(query.student_id)?,
        course_id:  query.course_id,
        status:     query.status,
    };
    Ok(Json(enrollments::list(&state.pool, &filter).await?))
}

async fn get_enrollment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<Json<Enrollment>> {
    let enrollment = enrollments::get(&state.pool, &id).await?;
    user.require_self_or_staff(&enrollment.student_id)?;
    Ok(Json(enrollment))
}

async fn create_enrollment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateEnrollmentBody>,
) -> AppResult<(StatusCode, Json<Enrollment>)> {
    user.require_staff()?;

    let student_id = required(body.student_id.clone())?;
    let course_id = required(body.course_id.clone())?;
    let start_raw = required(body.start_date.clone())?;
    let frequency = body.frequency.ok_or_else(AppError::missing_fields)?;
    body.validate()?;

    let created = enrollments::create(
        &state.pool,
        NewEnrollment {
            student_id,
            course_id,
            frequency,
            start_date:   parse_day(&start_raw, "startDate")?,
            schedule:     body.schedule,
            payment_mode: body.payment_mode.unwrap_or_default(),
            custom_weeks: body.custom_weeks,
            cycle:        body.cycle,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_enrollment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<UpdateEnrollmentBody>,
) -> AppResult<Json<Enrollment>> {
    user.require_staff()?;
    body.validate()?;

    let start_date = match body.start_date.as_deref() {
        Some(raw) => Some(parse_day(raw, "startDate")?),
        None => None,
    };

    let updated = enrollments::update(
        &state.pool,
        &id,
        EnrollmentChanges {
            frequency:    body.frequency,
            start_date,
            payment_mode: body.payment_mode,
            custom_weeks: body.custom_weeks,
            schedule:     body.schedule,
            status:       body.status,
            cycle:        body.cycle,
        },
    )
    .await?;
    Ok(Json(updated))
}

async fn defer_enrollment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<DeferBody>,
) -> AppResult<Json<DeferralOutcome>> {
    let enrollment = enrollments::get(&state.pool, &id).await?;
    user.require_self_or_staff(&enrollment.student_id)?;

    let weeks = body.deferral_weeks.ok_or_else(AppError::missing_fields)?;
    body.validate()?;

    let outcome = deferral::defer(&state.pool, &state.clock, &id, weeks).await?;
    Ok(Json(outcome))
}

async fn renew_enrollment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<(StatusCode, Json<Enrollment>)> {
    user.require_staff()?;
    let renewed = enrollments::renew(&state.pool, &id).await?;
    Ok((StatusCode::CREATED, Json(renewed)))
}

async fn add_bonus(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<BonusBody>,
) -> AppResult<Json<Enrollment>> {
    user.require_staff()?;
    body.validate()?;
    let updated = enrollments::add_bonus(&state.pool, &id, body.bonus_sessions, body.bonus_weeks).await?;
    Ok(Json(updated))
}
