use chrono::{FixedOffset, Local, Offset};
use dotenvy::dotenv;
use std::env;
use thiserror::Error;

const DEV_SESSION_SECRET: &str = "dev-session-secret-not-for-production";

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url:     String,

    // Backend
    pub backend_host:     String,
    pub backend_port:     u16,

    // Session
    pub session_secret:   String,

    // School calendar
    pub school_utc_offset:  FixedOffset,
    pub absence_lead_hours: i64,
    pub makeup_lead_hours:  i64,

    // Background jobs
    pub deferral_sweep_enabled:          bool,
    pub deferral_sweep_interval_minutes: u64,

    // Dev session (only seeded when app_env == "development")
    pub dev_session_token: Option<String>,

    // App
    pub app_env:          String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        fn require(key: &str) -> Result<String, ConfigError> {
            env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
        }

        fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
            match env::var(key) {
                Ok(raw) => raw
                    .trim()
                    .parse::<T>()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), raw)),
                Err(_) => Ok(default),
            }
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".into());

        // Production refuses to start with a guessable secret.
        let session_secret = match require("SESSION_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ if app_env == "production" => {
                return Err(ConfigError::MissingVar("SESSION_SECRET".into()));
            }
            _ => {
                tracing::warn!("SESSION_SECRET not set; using the development fallback");
                DEV_SESSION_SECRET.to_string()
            }
        };

        let school_utc_offset = match env::var("SCHOOL_UTC_OFFSET") {
            Ok(raw) => parse_utc_offset(&raw)
                .ok_or_else(|| ConfigError::InvalidValue("SCHOOL_UTC_OFFSET".into(), raw))?,
            Err(_) => Local::now().offset().fix(),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://classledger.db?mode=rwc".into()),

            backend_host: env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            backend_port: parse_or("BACKEND_PORT", 8080)?,

            session_secret,

            school_utc_offset,
            absence_lead_hours: parse_or("ABSENCE_LEAD_HOURS", 6)?,
            makeup_lead_hours:  parse_or("MAKEUP_LEAD_HOURS", 24)?,

            deferral_sweep_enabled:          parse_or("DEFERRAL_SWEEP_ENABLED", true)?,
            deferral_sweep_interval_minutes: parse_or("DEFERRAL_SWEEP_INTERVAL_MINUTES", 60)?,

            dev_session_token: env::var("DEV_SESSION_TOKEN").ok().filter(|t| !t.trim().is_empty()),

            app_env,
        })
    }

    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}

/// Parse `+07:00`, `-03:30` or `Z`.
fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw == "+00:00" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else {
        (-1, raw.strip_prefix('-')?)
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
