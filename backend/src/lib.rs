pub mod auth;
pub mod calendar;
pub mod config;
pub mod db;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use state::AppState;

/// The full HTTP application: `/api/v1` routes plus cookie, CORS and trace layers.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::all_routes(state.clone()))
        .layer(CookieManagerLayer::new())   // must come before state
        .layer(CorsLayer::permissive())     // tighten in production
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
