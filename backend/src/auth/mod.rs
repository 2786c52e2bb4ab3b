//! Caller identity. Sessions are issued by the identity service; this crate
//! only verifies them against `user_sessions`.

pub mod seed;

use sha2::{Digest, Sha256};
use uuid::Uuid;

// ── Token helpers ─────────────────────────────────────────────

/// Generate a 64-char hex token from two UUIDs (256 bits of entropy).
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Digest stored in `user_sessions.token_hash`. The secret peppers the hash so
/// a leaked table alone does not validate cookies.
pub fn hash_session_token(secret: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
