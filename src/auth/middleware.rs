//! Logout freshness middleware
//!
//! Every request carrying a session cookie is checked against the user's
//! `logged_out_at`. A session that started before the most recent forced
//! logout is destroyed and the browser is sent home.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};

use super::redirect_home;
use crate::AppState;
use crate::data::{SessionRecord, User};
use crate::metrics::SESSIONS_INVALIDATED_TOTAL;

/// Whether a session started at `logged_in_at` survives `logged_out_at`.
///
/// Equal timestamps count as logged out.
pub fn session_is_fresh(logged_in_at: DateTime<Utc>, logged_out_at: Option<DateTime<Utc>>) -> bool {
    match logged_out_at {
        None => true,
        Some(logged_out_at) => logged_out_at < logged_in_at,
    }
}

/// A session that passed the freshness check, with its user
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub session: SessionRecord,
    pub user: User,
}

/// Middleware enforcing server-side forced logout
///
/// Unknown, expired or unreadable sessions and sessions whose user is gone
/// are treated as anonymous. Store failures here are never fatal.
///
/// # Usage
/// ```ignore
/// let app = Router::new()
///     .route("/", get(home))
///     .layer(middleware::from_fn_with_state(state, enforce_logout_freshness));
/// ```
pub async fn enforce_logout_freshness(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(raw) = jar
        .get(state.sessions.cookie_name())
        .map(|cookie| cookie.value().to_owned())
    else {
        return next.run(request).await;
    };

    let session = match state.sessions.load(&state.db, &raw).await {
        Ok(Some(session)) => session,
        Ok(None) => return next.run(request).await,
        Err(error) => {
            tracing::warn!(%error, "Failed to load session; treating request as anonymous");
            return next.run(request).await;
        }
    };

    let user = match state.db.find_user_by_id(session.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::debug!(user_id = session.user_id, "Session refers to unknown user");
            return next.run(request).await;
        }
        Err(error) => {
            tracing::warn!(
                %error,
                user_id = session.user_id,
                "Failed to load session user; treating request as anonymous"
            );
            return next.run(request).await;
        }
    };

    if session_is_fresh(session.logged_in_at, user.logged_out_at) {
        request
            .extensions_mut()
            .insert(CurrentSession { session, user });
        return next.run(request).await;
    }

    tracing::info!(
        user_id = user.id,
        logged_in_at = %session.logged_in_at,
        logged_out_at = ?user.logged_out_at,
        "Session predates forced logout; destroying it"
    );
    if let Err(error) = state.sessions.destroy(&state.db, &raw).await {
        tracing::warn!(%error, user_id = user.id, "Failed to delete stale session");
    }
    SESSIONS_INVALIDATED_TOTAL.inc();

    (jar.remove(state.sessions.removal_cookie()), redirect_home()).into_response()
}

/// Optional current session extractor
///
/// Returns None if the request is anonymous, instead of error.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<CurrentSession>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<CurrentSession>().cloned()))
    }
}
