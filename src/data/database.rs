//! SQLite database operations
//!
//! All database access goes through this module.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Attempts `find_or_create_user` makes before giving up on a row that a
/// concurrent insert reported but the follow-up read cannot see.
const FIND_OR_CREATE_ATTEMPTS: usize = 2;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
            }
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Fetch the user for `external_id`, creating it with `default_email`
    /// when it does not exist yet.
    ///
    /// The UNIQUE constraint on `external_id` plus `ON CONFLICT DO NOTHING`
    /// guarantees one row per identity under concurrent logins. The losing
    /// insert re-reads the winner's row. An existing row's email is never
    /// overwritten.
    ///
    /// # Returns
    /// The user and whether this call created it
    pub async fn find_or_create_user(
        &self,
        external_id: &str,
        default_email: &str,
    ) -> Result<(User, bool), AppError> {
        for attempt in 1..=FIND_OR_CREATE_ATTEMPTS {
            if let Some(user) = self.find_user_by_external_id(external_id).await? {
                return Ok((user, false));
            }

            let inserted = sqlx::query_as::<_, User>(
                r#"
                INSERT INTO users (email, external_id, logged_out_at, created_at)
                VALUES (?, ?, NULL, ?)
                ON CONFLICT(external_id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(default_email)
            .bind(external_id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(user) = inserted {
                return Ok((user, true));
            }

            tracing::debug!(
                external_id,
                attempt,
                "Concurrent insert won the race; re-reading user"
            );
        }

        // A concurrent insert claimed the id but its row is not visible.
        match self.find_user_by_external_id(external_id).await? {
            Some(user) => Ok((user, false)),
            None => Err(AppError::Internal(anyhow::anyhow!(
                "user for external id {external_id} vanished during find-or-create"
            ))),
        }
    }

    /// Record a forced logout for the user
    pub async fn mark_logged_out(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET logged_out_at = ? WHERE id = ?")
            .bind(at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn count_users(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn insert_session(&self, session: &SessionRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id_hash, user_id, logged_in_at, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&session.id_hash)
        .bind(session.user_id)
        .bind(session.logged_in_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a session by the hash of its cookie value
    ///
    /// Expired rows are returned as-is; callers decide what expiry means.
    pub async fn get_session(&self, id_hash: &str) -> Result<Option<SessionRecord>, AppError> {
        let session =
            sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE id_hash = ?")
                .bind(id_hash)
                .fetch_optional(&self.pool)
                .await?;

        Ok(session)
    }

    pub async fn delete_session(&self, id_hash: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE id_hash = ?")
            .bind(id_hash)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete every session that expired at or before `now`
    ///
    /// # Returns
    /// Number of deleted sessions
    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
