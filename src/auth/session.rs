//! Session management
//!
//! Sessions live server-side in the `sessions` table. The browser only holds
//! an opaque random identifier in a cookie; the database stores its SHA-256
//! hash so a leaked database cannot be replayed as cookies.

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::AppConfig;
use crate::data::{Database, SessionRecord};
use crate::error::AppError;

const SESSION_ID_BYTES: usize = 32;

/// Generate a new opaque session identifier
fn generate_session_id() -> String {
    let mut bytes = [0_u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a raw cookie value into the key stored in the database
pub fn hash_session_id(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(raw.as_bytes()))
}

/// Creates, loads and destroys server-side sessions and builds their cookies.
#[derive(Debug, Clone)]
pub struct SessionManager {
    cookie_name: String,
    max_age_seconds: i64,
    secure_cookies: bool,
}

impl SessionManager {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            cookie_name: config.auth.cookie_name.clone(),
            max_age_seconds: config.auth.session_max_age,
            secure_cookies: config.should_use_secure_cookies(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Start a session for `user_id`, stamped with the current time
    ///
    /// # Returns
    /// The raw identifier for the cookie and the stored record
    pub async fn establish(
        &self,
        db: &Database,
        user_id: i64,
    ) -> Result<(String, SessionRecord), AppError> {
        let raw = generate_session_id();
        let logged_in_at = Utc::now();
        let record = SessionRecord {
            id_hash: hash_session_id(&raw),
            user_id,
            logged_in_at,
            expires_at: logged_in_at + Duration::seconds(self.max_age_seconds),
        };

        db.insert_session(&record).await?;
        tracing::debug!(user_id, "Session established");

        Ok((raw, record))
    }

    /// Load a live session for a raw cookie value
    ///
    /// Expired sessions are deleted and reported as absent.
    pub async fn load(&self, db: &Database, raw: &str) -> Result<Option<SessionRecord>, AppError> {
        let id_hash = hash_session_id(raw);
        let Some(record) = db.get_session(&id_hash).await? else {
            return Ok(None);
        };

        if record.is_expired() {
            db.delete_session(&id_hash).await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    pub async fn destroy(&self, db: &Database, raw: &str) -> Result<(), AppError> {
        db.delete_session(&hash_session_id(raw)).await
    }

    /// Cookie carrying a freshly established session
    pub fn session_cookie(&self, raw: String) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), raw))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.max_age_seconds))
            .build()
    }

    /// Cookie that removes the session cookie from the browser
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.cookie_name.clone(), String::new()))
            .path("/")
            .http_only(true)
            .build();
        cookie.make_removal();
        cookie
    }
}
