use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use classledger_backend::{
    auth, build_app,
    calendar::Clock,
    config::Config,
    db,
    services::deferral,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ───────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── Config ────────────────────────────────────────────────
    let config = Config::from_env()?;
    tracing::info!(
        env = %config.app_env,
        utc_offset = %config.school_utc_offset,
        "Starting classledger backend"
    );

    // ── Database ──────────────────────────────────────────────
    let pool = db::connect(&config).await?;
    db::run_migrations(&pool).await?;

    // ── Seed admin account ────────────────────────────────────
    auth::seed::seed_accounts(&pool, &config).await?;

    let clock = Clock::new(config.school_utc_offset);
    let app_state = AppState { pool, config, clock };

    // ── Background jobs ───────────────────────────────────────
    deferral::spawn_deferral_sweep(app_state.clone());

    let addr: SocketAddr = format!(
        "{}:{}",
        app_state.config.backend_host,
        app_state.config.backend_port
    )
    .parse()?;

    let app = build_app(app_state);
    tracing::info!(%addr, "Listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
