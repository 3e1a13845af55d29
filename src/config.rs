//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 4000)
    pub port: u16,
    /// Public domain (e.g., "login.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the public base URL
    ///
    /// # Returns
    /// Full URL like "https://login.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// URL the provider sends the browser back to after a wave.
    pub fn login_redirect_url(&self) -> String {
        format!("{}/login", self.base_url())
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Identity provider (Clef) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// API root, e.g. "https://clef.io/api/v1"
    pub base_url: String,
    /// Application id issued by the provider
    pub app_id: String,
    /// Application secret issued by the provider
    pub app_secret: String,
    /// Upper bound for every outbound provider call
    pub request_timeout_ms: u64,
    /// Script rendering the login button on the home page
    pub button_script_url: String,
}

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Name of the session cookie
    pub cookie_name: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
    /// How often expired sessions are swept (default: 3600)
    pub session_sweep_interval_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.trim().eq_ignore_ascii_case("json")
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn filter_directive(&self) -> String {
        let level = self.level.trim().to_ascii_lowercase();
        format!("wavelogin={level},tower_http={level}")
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        let level = self.level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(AppError::Config(format!(
                "logging.level must be one of {}, got {:?}",
                LOG_LEVELS.join(", "),
                self.level
            )));
        }

        let format = self.format.trim();
        if !format.eq_ignore_ascii_case("json") && !format.eq_ignore_ascii_case("pretty") {
            return Err(AppError::Config(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.format
            )));
        }

        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (WAVELOGIN__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 4000)?
            .set_default("server.domain", "localhost:4000")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "./wavelogin.sqlite")?
            .set_default("provider.base_url", "https://clef.io/api/v1")?
            .set_default("provider.request_timeout_ms", 5000)?
            .set_default("provider.button_script_url", "https://clef.io/v3/clef.js")?
            .set_default("auth.cookie_name", "wavelogin_session")?
            .set_default("auth.session_max_age", 604800)?
            .set_default("auth.session_sweep_interval_seconds", 3600)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("WAVELOGIN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.provider.app_id.trim().is_empty() {
            return Err(AppError::Config(
                "provider.app_id must not be empty".to_string(),
            ));
        }

        if self.provider.app_secret.trim().is_empty() {
            return Err(AppError::Config(
                "provider.app_secret must not be empty".to_string(),
            ));
        }

        if let Err(error) = url::Url::parse(&self.provider.base_url) {
            return Err(AppError::Config(format!(
                "provider.base_url is not a valid URL: {error}"
            )));
        }

        if self.provider.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "provider.request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.auth.session_max_age <= 0 {
            return Err(AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.auth.cookie_name.trim().is_empty() {
            return Err(AppError::Config(
                "auth.cookie_name must not be empty".to_string(),
            ));
        }

        self.logging.validate()?;

        if !self.should_use_secure_cookies() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Using insecure session cookies for local development"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
