//! wavelogin - sign in with Clef, enforce forced logout server-side
//!
//! # Architecture
//!
//! ```text
//! browser ──► freshness middleware ──► route handler ──► provider client
//!                    │                       │                 (Clef API)
//!                    └──────── sessions ◄────┴──► user store (SQLite)
//! ```
//!
//! # Modules
//!
//! - `api`: home page and metrics endpoint
//! - `auth`: Clef handshake, sessions, logout freshness middleware
//! - `data`: SQLite user and session store
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Cloned for each request; every field is a shared handle.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// User and session store
    pub db: Arc<data::Database>,

    /// Identity provider client
    pub provider: Arc<auth::ProviderClient>,

    /// Session cookie and lifecycle settings
    pub sessions: Arc<auth::SessionManager>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Validate configuration
    /// 2. Connect to SQLite database and run migrations
    /// 3. Build the identity provider client
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        config.validate()?;

        let db = data::Database::connect(&config.database.path).await?;
        metrics::USERS_TOTAL.set(db.count_users().await?);
        let provider = auth::ProviderClient::new(&config.provider)?;
        let sessions = auth::SessionManager::new(&config);

        tracing::info!(
            provider = %config.provider.base_url,
            timeout_ms = config.provider.request_timeout_ms,
            "Application state initialized successfully"
        );

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            provider: Arc::new(provider),
            sessions: Arc::new(sessions),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, middleware, routing::get};
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    Router::new()
        .route("/", get(api::home))
        .route("/health", get(health_check))
        .merge(auth::auth_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::enforce_logout_freshness,
        ))
        .layer(RequestBodyLimitLayer::new(16 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
