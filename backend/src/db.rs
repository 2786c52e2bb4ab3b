use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use crate::config::Config;

pub type Db = SqlitePool;

pub async fn connect(config: &Config) -> anyhow::Result<Db> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    tracing::info!("Database connection pool established");
    Ok(pool)
}

/// Run all SQLx migrations from the `migrations/` directory embedded at compile time.
pub async fn run_migrations(pool: &Db) -> anyhow::Result<()> {
    sqlx::migrate!("../database/migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// True when `err` is a unique/primary-key violation, i.e. a guarded write lost.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

/// True when SQLite refused a lock, e.g. two deferred transactions racing to
/// upgrade to a write lock. Nothing was written; the caller may retry.
pub fn is_busy(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| is_busy_code(&code))
}

/// SQLITE_BUSY (5) and its extended codes (`5 | n << 8`).
fn is_busy_code(code: &str) -> bool {
    code.parse::<i32>().is_ok_and(|c| c & 0xff == 5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_codes_include_extended_variants() {
        assert!(is_busy_code("5"));
        assert!(is_busy_code("261")); // SQLITE_BUSY_RECOVERY
        assert!(is_busy_code("517")); // SQLITE_BUSY_SNAPSHOT
        assert!(!is_busy_code("2067")); // SQLITE_CONSTRAINT_UNIQUE
        assert!(!is_busy_code("6"));
        assert!(!is_busy_code("HY000"));
    }
}
