use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::hash_session_token;
use crate::config::Config;
use crate::db::Db;

const ADMIN_DISPLAY_NAME: &str = "Administrator";

/// Seeds the admin account and, in development, a known admin session.
/// Safe to call on every startup: existence is checked before inserting.
pub async fn seed_accounts(pool: &Db, config: &Config) -> anyhow::Result<()> {
    let admin_id = seed_admin(pool).await?;

    if config.is_development() {
        if let Some(token) = &config.dev_session_token {
            seed_dev_session(pool, config, &admin_id, token).await?;
        }
    }

    Ok(())
}

async fn seed_admin(pool: &Db) -> anyhow::Result<String> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM users WHERE role = 'admin' AND display_name = ? LIMIT 1",
    )
    .bind(ADMIN_DISPLAY_NAME)
    .fetch_optional(pool)
    .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO users (id, display_name, role, is_active) VALUES (?, ?, 'admin', 1)")
        .bind(&id)
        .bind(ADMIN_DISPLAY_NAME)
        .execute(pool)
        .await?;
    tracing::info!(admin_id = %id, "Seeded admin account");
    Ok(id)
}

async fn seed_dev_session(pool: &Db, config: &Config, admin_id: &str, token: &str) -> anyhow::Result<()> {
    let token_hash = hash_session_token(&config.session_secret, token);
    let expires_at = Utc::now().naive_utc() + Duration::days(30);

    sqlx::query(
        "INSERT INTO user_sessions (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (token_hash) DO UPDATE SET expires_at = excluded.expires_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(admin_id)
    .bind(token_hash)
    .bind(expires_at)
    .execute(pool)
    .await?;

    tracing::warn!("Development admin session seeded from DEV_SESSION_TOKEN");
    Ok(())
}
