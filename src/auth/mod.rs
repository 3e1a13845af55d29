//! Clef authentication
//!
//! Handles:
//! - The wave handshake with the identity provider
//! - Server-side session management
//! - Logout freshness middleware

mod handshake;
mod middleware;
pub mod provider;
pub mod session;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

pub use handshake::{LOGOUT_ACKNOWLEDGEMENT, auth_router};
pub use middleware::{CurrentSession, MaybeUser, enforce_logout_freshness, session_is_fresh};
pub use provider::{LogoutVerdict, ProviderClient, ProviderError, ProviderIdentity};
pub use session::SessionManager;

/// 302 to the home page
pub(crate) fn redirect_home() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response()
}
