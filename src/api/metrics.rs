//! Prometheus scrape endpoint

use axum::{
    Router,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::error::AppError;

const PROMETHEUS_TEXT_FORMAT: &str = "text/plain; version=0.0.4";

async fn scrape() -> Result<Response, AppError> {
    let body = crate::metrics::render().map_err(|e| AppError::Internal(e.into()))?;
    Ok(([(header::CONTENT_TYPE, PROMETHEUS_TEXT_FORMAT)], body).into_response())
}

/// GET /metrics
///
/// Mounted outside the session middleware so scrapes never touch the store.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(scrape))
}
