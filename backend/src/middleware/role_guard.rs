//! Role-based authorization guard.

use axum::{
    extract::{Extension, Request},
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;
use crate::middleware::auth_guard::AuthUser;

/// Middleware: require the `admin` or `teacher` role.
pub async fn require_staff(
    Extension(user): Extension<AuthUser>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    user.require_staff()?;
    Ok(next.run(req).await)
}
