//! wavelogin binary entry point

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wavelogin::{AppState, config};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from the `logging` section
/// 3. Initialize AppState
/// 4. Start the expired-session sweeper
/// 5. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::AppConfig::load()?;
    init_tracing(&config.logging);

    tracing::info!("Starting wavelogin...");

    wavelogin::metrics::init_metrics();

    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        level = %config.logging.level,
        "Configuration loaded"
    );

    let state = AppState::new(config.clone()).await?;
    spawn_session_sweep_task(state.clone());

    let app = wavelogin::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}

/// `RUST_LOG` wins over `logging.level` when set.
fn init_tracing(logging: &config::LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter_directive().into());

    if logging.is_json() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Spawn background task deleting expired sessions
fn spawn_session_sweep_task(state: AppState) {
    tokio::spawn(async move {
        let interval_secs = state.config.auth.session_sweep_interval_seconds.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match state.db.delete_expired_sessions(chrono::Utc::now()).await {
                Ok(0) => tracing::debug!("No expired sessions to sweep"),
                Ok(deleted) => tracing::info!(deleted, "Swept expired sessions"),
                Err(error) => tracing::error!(%error, "Session sweep failed"),
            }
        }
    });

    tracing::info!("Session sweep task spawned");
}
