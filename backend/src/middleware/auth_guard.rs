//! Authentication guard middleware.
//!
//! Reads the `session` cookie, validates its digest against `user_sessions`,
//! and injects an `AuthUser` extension into the request for downstream handlers.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tower_cookies::Cookies;

use crate::{
    auth::hash_session_token,
    errors::{AppError, AppResult},
    models::UserRole,
    state::AppState,
};

pub const SESSION_COOKIE: &str = "session";

/// Authenticated caller extracted from a valid session. Injected into request
/// extensions by `require_auth`; downstream handlers use `Extension<AuthUser>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role:    UserRole,
}

impl AuthUser {
    pub fn require_staff(&self) -> AppResult<()> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Staff may act for anyone; students only for themselves.
    pub fn require_self_or_staff(&self, student_id: &str) -> AppResult<()> {
        if self.role.is_staff() || self.user_id == student_id {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Narrow a student-id filter: students always see only their own rows.
    pub fn scope_student(&self, requested: Option<String>) -> AppResult<Option<String>> {
        if self.role.is_staff() {
            return Ok(requested);
        }
        match requested {
            Some(id) if id != self.user_id => Err(AppError::Forbidden),
            _ => Ok(Some(self.user_id.clone())),
        }
    }
}

/// Middleware: require any valid session cookie.
/// On success, inserts `AuthUser` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = cookies
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_owned())
        .ok_or(AppError::Unauthorized)?;

    #[derive(sqlx::FromRow)]
    struct SessionRow {
        id:   String,
        role: UserRole,
    }

    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT u.id, u.role
         FROM user_sessions s
         JOIN users u ON u.id = s.user_id
         WHERE s.token_hash = ?
           AND s.expires_at > ?
           AND u.is_active = 1
         LIMIT 1",
    )
    .bind(hash_session_token(&state.config.session_secret, &token))
    .bind(Utc::now().naive_utc())
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(AuthUser {
        user_id: row.id,
        role:    row.role,
    });

    Ok(next.run(req).await)
}
