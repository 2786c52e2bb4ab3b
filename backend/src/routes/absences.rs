use axum::{
    extract::{Extension, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::required;
use crate::{
    errors::AppResult,
    middleware::auth_guard::AuthUser,
    models::AbsenceRequest,
    services::absences::{self, NewAbsence},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/absences", get(list_absences).post(create_absence))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    student_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAbsenceBody {
    student_id:        Option<String>,
    enrollment_id:     Option<String>,
    class_id:          Option<String>,
    session_date:      Option<String>,
    reason:            Option<String>,
    #[serde(default)]
    marked_by_teacher: bool,
}

async fn list_absences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<AbsenceRequest>>> {
    let student_id = user.scope_student(query.student_id)?;
    Ok(Json(absences::list(&state.pool, student_id.as_deref()).await?))
}

async fn create_absence(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateAbsenceBody>,
) -> AppResult<(StatusCode, Json<AbsenceRequest>)> {
    let student_id = required(body.student_id)?;
    user.require_self_or_staff(&student_id)?;

    let new = NewAbsence {
        student_id,
        enrollment_id:     required(body.enrollment_id)?,
        class_id:          body.class_id,
        session_date:      required(body.session_date)?,
        reason:            required(body.reason)?,
        // Only staff may waive the lead-time rule.
        marked_by_teacher: body.marked_by_teacher && user.role.is_staff(),
    };

    let row = absences::create(&state.pool, &state.clock, state.config.absence_lead_hours, new).await?;
    Ok((StatusCode::CREATED, Json(row)))
}
