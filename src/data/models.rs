//! Data models
//!
//! Rust structs representing database rows.
//! Timestamps are chrono `DateTime<Utc>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// User
// =============================================================================

/// A locally known identity
///
/// Created on the first successful login for an `external_id` and never
/// deleted. Only `logged_out_at` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Subject id asserted by the identity provider (unique)
    pub external_id: String,
    /// Last forced logout reported by the provider
    pub logged_out_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Session
// =============================================================================

/// A server-side browser session
///
/// `id_hash` is the SHA-256 of the opaque cookie value; the raw value is
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SessionRecord {
    pub id_hash: String,
    pub user_id: i64,
    pub logged_in_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
