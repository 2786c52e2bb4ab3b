//! `/classes` routes: catalog reads for everyone, roster and cancellation
//! writes for staff only.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use super::required;
use crate::{
    errors::{AppError, AppResult},
    middleware::{auth_guard::AuthUser, role_guard::require_staff},
    models::ClassDetail,
    services::{
        cancellation::{self, CancellationOutcome},
        classes::{self, NewClass, NewSession},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    let reads = Router::new()
        .route("/classes",      get(list_classes))
        .route("/classes/{id}", get(get_class));

    let writes = Router::new()
        .route("/classes",                            post(create_class))
        .route("/classes/{id}/students",              post(add_student))
        .route("/classes/{id}/students/{student_id}", delete(remove_student))
        .route("/classes/{id}/cancel",                post(cancel_session))
        .route_layer(middleware::from_fn(require_staff));

    reads.merge(writes)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    course_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody {
    day_of_week: Option<u8>,
    start_time:  Option<String>,
    end_time:    Option<String>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateClassBody {
    name:         Option<String>,
    grade:        Option<String>,
    course_id:    Option<String>,
    teacher_id:   Option<String>,
    #[validate(range(min = 1))]
    max_students: Option<i64>,
    #[serde(default)]
    sessions:     Vec<SessionBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddStudentBody {
    student_id: Option<String>,
}

#[derive(Deserialize)]
struct CancelBody {
    date: Option<String>,
}

async fn list_classes(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<ClassDetail>>> {
    Ok(Json(classes::list(&state.pool, query.course_id.as_deref()).await?))
}

async fn get_class(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ClassDetail>> {
    Ok(Json(classes::get(&state.pool, &id).await?))
}

async fn create_class(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateClassBody>,
) -> AppResult<(StatusCode, Json<ClassDetail>)> {
    body.validate()?;

    let sessions = body
        .sessions
        .into_iter()
        .map(|s| -> AppResult<NewSession> {
            Ok(NewSession {
                day_of_week: s.day_of_week.ok_or_else(AppError::missing_fields)?,
                start_time:  required(s.start_time)?,
                end_time:    required(s.end_time)?,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    let new = NewClass {
        name:         required(body.name)?,
        grade:        required(body.grade)?,
        course_id:    required(body.course_id)?,
        teacher_id:   body.teacher_id.or(Some(user.user_id)),
        max_students: body.max_students.unwrap_or(10),
        sessions,
    };
    let created = classes::create(&state.pool, new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn add_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AddStudentBody>,
) -> AppResult<Json<ClassDetail>> {
    let student_id = required(body.student_id)?;
    Ok(Json(classes::add_student(&state.pool, &id, &student_id).await?))
}

async fn remove_student(
    State(state): State<AppState>,
    Path((id, student_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    classes::remove_student(&state.pool, &id, &student_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> AppResult<Json<CancellationOutcome>> {
    let date = required(body.date)?;
    let outcome = cancellation::cancel(&state.pool, &state.clock, &id, &date, Some(&user.user_id)).await?;
    Ok(Json(outcome))
}
