//! Common test utilities for E2E tests

#![allow(dead_code)]

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use wavelogin::{AppState, config};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const COOKIE_NAME: &str = "wavelogin_session";

/// Test server instance backed by a mock identity provider
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub provider: MockServer,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_provider_timeout_ms(2000).await
    }

    pub async fn with_provider_timeout_ms(timeout_ms: u64) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let provider = MockServer::start().await;

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            provider: config::ProviderConfig {
                base_url: provider.uri(),
                app_id: "test-app-id".to_string(),
                app_secret: "test-app-secret".to_string(),
                request_timeout_ms: timeout_ms,
                button_script_url: "https://clef.io/v3/clef.js".to_string(),
            },
            auth: config::AuthConfig {
                cookie_name: COOKIE_NAME.to_string(),
                session_max_age: 604800,
                session_sweep_interval_seconds: 3600,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let state = AppState::new(config).await.unwrap();

        // Redirects are asserted on, never followed
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = wavelogin::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            provider,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Provider accepts `code` and hands out `token`, which resolves to the
    /// given identity.
    pub async fn mock_handshake(&self, code: &str, token: &str, external_id: &str, email: &str) {
        self.mock_authorize(code, 200, json!({ "success": true, "access_token": token }))
            .await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .and(query_param("access_token", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "info": { "id": external_id, "email": email }
            })))
            .mount(&self.provider)
            .await;
    }

    pub async fn mock_authorize(&self, code: &str, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path("/authorize"))
            .and(body_string_contains(format!("code={code}")))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.provider)
            .await;
    }

    pub async fn mock_logout(&self, logout_token: &str, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path("/logout"))
            .and(body_string_contains(format!("logout_token={logout_token}")))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.provider)
            .await;
    }

    /// Complete a login and return the session cookie value
    pub async fn login(&self, code: &str) -> String {
        let response = self
            .client
            .get(self.url(&format!("/login?code={code}")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 302, "login should redirect home");
        session_cookie(&response).expect("login sets the session cookie")
    }

    pub async fn get_home(&self, session: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url("/"));
        if let Some(session) = session {
            request = request.header("Cookie", format!("{COOKIE_NAME}={session}"));
        }
        request.send().await.unwrap()
    }

    pub async fn post_logout_webhook(&self, logout_token: &str) -> reqwest::Response {
        self.client
            .post(self.url("/logout"))
            .form(&[("logout_token", logout_token)])
            .send()
            .await
            .unwrap()
    }
}

/// Extract the session cookie value set by a response, if any
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter_map(|pair| pair.trim().strip_prefix(&format!("{COOKIE_NAME}=")).map(str::to_string))
        .find(|value| !value.is_empty())
}

/// Whether a response tells the browser to drop the session cookie
pub fn clears_session_cookie(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(&format!("{COOKIE_NAME}=;")) || value == format!("{COOKIE_NAME}="))
}
