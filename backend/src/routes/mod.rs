use axum::{middleware, Router};
use crate::{
    calendar::CalendarDay,
    errors::{AppError, AppResult},
    middleware::auth_guard::require_auth,
    state::AppState,
};

mod absences;
mod attendance;
mod classes;
mod enrollments;
mod health;
mod makeups;

/// Build the full `/api/v1` router.
///
/// The health probe is left unprotected; every other route is wrapped in
/// the session-based [`require_auth`] middleware.
pub fn all_routes(state: AppState) -> Router<AppState> {
    let auth_mw = middleware::from_fn_with_state(state, require_auth);
    Router::new()
        .merge(health::router())   // public, no auth required
        .merge(
            Router::new()
                .merge(enrollments::router())
                .merge(attendance::router())
                .merge(absences::router())
                .merge(makeups::router())
                .merge(classes::router())
                .route_layer(auth_mw),
        )
}

// ── Body helpers ─────────────────────────────────────────────

/// A required body field: absent or blank is a 400.
fn required(value: Option<String>) -> AppResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(AppError::missing_fields)
}

fn parse_day(raw: &str, field: &str) -> AppResult<CalendarDay> {
    CalendarDay::parse(raw)
        .ok_or_else(|| AppError::BadRequest(format!("{field} must be in yyyy-mm-dd format")))
}
