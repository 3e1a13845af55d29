//! HTTP handlers outside the authentication flow

mod home;
mod metrics;

pub use home::home;
pub use metrics::metrics_router;
