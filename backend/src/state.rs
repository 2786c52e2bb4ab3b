//! Shared application state: injected into every handler via `axum::extract::State`.

use crate::{calendar::Clock, config::Config, db::Db};

/// Application-wide state passed via axum `State<AppState>`.
///
/// `SqlitePool` is `Arc`-backed and `Clock` is `Copy`, so cloning per request
/// is cheap.
#[derive(Clone)]
pub struct AppState {
    pub pool:   Db,
    pub config: Config,
    pub clock:  Clock,
}
