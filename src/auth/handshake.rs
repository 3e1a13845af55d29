//! Clef login callback and logout webhook
//!
//! Routes:
//! - GET /login - the browser lands here after the user waves; completes the
//!   handshake and starts a session
//! - POST /logout - server-to-server notification that a user logged out
//!   on their phone

use axum::{
    Form, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use chrono::Utc;
use serde::Deserialize;

use super::provider::LogoutVerdict;
use super::redirect_home;
use crate::AppState;
use crate::error::AppError;
use crate::metrics::{FORCED_LOGOUTS_TOTAL, LOGINS_TOTAL, USERS_CREATED_TOTAL, USERS_TOTAL};

/// Body returned to every logout webhook call
pub const LOGOUT_ACKNOWLEDGEMENT: &str = "bye";

/// Create authentication router
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_callback))
        .route("/logout", post(logout_webhook))
}

// =============================================================================
// Login
// =============================================================================

/// Query parameters of the login redirect
#[derive(Debug, Deserialize)]
struct LoginQuery {
    code: Option<String>,
}

/// GET /login
///
/// # Steps
/// 1. Exchange `code` for an access token, then for the user's identity
/// 2. Find or create the local user
/// 3. Replace any existing browser session with a new one
/// 4. Redirect home
///
/// Nothing is persisted when the handshake fails.
async fn login_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Result<impl IntoResponse, AppError> {
    let code = query
        .code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AppError::Validation("missing `code` query parameter".to_string()))
        .inspect_err(|_| LOGINS_TOTAL.with_label_values(&["invalid"]).inc())?;

    let identity = state.provider.authenticate(code).await.map_err(|error| {
        LOGINS_TOTAL.with_label_values(&["provider_error"]).inc();
        AppError::from(error)
    })?;

    let (user, created) = state
        .db
        .find_or_create_user(&identity.external_id, &identity.email)
        .await
        .inspect_err(|_| LOGINS_TOTAL.with_label_values(&["store_error"]).inc())?;

    if created {
        USERS_CREATED_TOTAL.inc();
        tracing::info!(
            user_id = user.id,
            external_id = %user.external_id,
            "Created user on first login"
        );
        match state.db.count_users().await {
            Ok(count) => USERS_TOTAL.set(count),
            Err(error) => tracing::warn!(%error, "Failed to refresh user count"),
        }
    }

    if let Some(previous) = jar.get(state.sessions.cookie_name()) {
        state.sessions.destroy(&state.db, previous.value()).await?;
    }

    let (raw, session) = state.sessions.establish(&state.db, user.id).await?;

    LOGINS_TOTAL.with_label_values(&["success"]).inc();
    tracing::info!(
        user_id = user.id,
        logged_in_at = %session.logged_in_at,
        "User logged in"
    );

    Ok((jar.add(state.sessions.session_cookie(raw)), redirect_home()))
}

// =============================================================================
// Logout webhook
// =============================================================================

/// Logout webhook parameters (form body or query string)
#[derive(Debug, Default, Deserialize)]
struct LogoutParams {
    logout_token: Option<String>,
}

/// What a logout webhook call ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForcedLogout {
    Recorded,
    UnknownUser,
    NotConfirmed,
}

impl ForcedLogout {
    fn label(self) -> &'static str {
        match self {
            ForcedLogout::Recorded => "recorded",
            ForcedLogout::UnknownUser => "unknown_user",
            ForcedLogout::NotConfirmed => "not_confirmed",
        }
    }
}

/// POST /logout
///
/// Always acknowledges with [`LOGOUT_ACKNOWLEDGEMENT`]. Failures are logged,
/// never reported back to the provider.
async fn logout_webhook(
    State(state): State<AppState>,
    Query(query): Query<LogoutParams>,
    form: Option<Form<LogoutParams>>,
) -> &'static str {
    let token = form
        .and_then(|Form(params)| params.logout_token)
        .or(query.logout_token)
        .filter(|token| !token.trim().is_empty());

    let Some(token) = token else {
        tracing::warn!("Logout webhook called without a logout_token");
        FORCED_LOGOUTS_TOTAL.with_label_values(&["invalid"]).inc();
        return LOGOUT_ACKNOWLEDGEMENT;
    };

    match record_forced_logout(&state, &token).await {
        Ok(outcome) => {
            FORCED_LOGOUTS_TOTAL
                .with_label_values(&[outcome.label()])
                .inc();
        }
        Err(error) => {
            FORCED_LOGOUTS_TOTAL.with_label_values(&["error"]).inc();
            tracing::error!(%error, "Failed to process logout webhook");
        }
    }

    LOGOUT_ACKNOWLEDGEMENT
}

async fn record_forced_logout(state: &AppState, token: &str) -> Result<ForcedLogout, AppError> {
    let external_id = match state.provider.verify_logout(token).await? {
        LogoutVerdict::Confirmed { external_id } => external_id,
        LogoutVerdict::Rejected { reason } => {
            tracing::warn!(reason = ?reason, "Provider did not confirm logout");
            return Ok(ForcedLogout::NotConfirmed);
        }
    };

    let Some(user) = state.db.find_user_by_external_id(&external_id).await? else {
        tracing::warn!(external_id = %external_id, "Logout for unknown user");
        return Ok(ForcedLogout::UnknownUser);
    };

    let logged_out_at = Utc::now();
    state.db.mark_logged_out(user.id, logged_out_at).await?;
    tracing::info!(
        user_id = user.id,
        logged_out_at = %logged_out_at,
        "Recorded forced logout"
    );

    Ok(ForcedLogout::Recorded)
}
