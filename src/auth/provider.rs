//! Clef identity provider client
//!
//! Implements the two-step wave handshake (code → access token → user info)
//! and verification of logout webhook tokens.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::ProviderConfig;
use crate::error::AppError;
use crate::metrics::observe_provider_request;

const AUTHORIZE_ENDPOINT: &str = "authorize";
const INFO_ENDPOINT: &str = "info";
const LOGOUT_ENDPOINT: &str = "logout";

/// Failure talking to the identity provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{endpoint} request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} request timed out")]
    Timeout { endpoint: &'static str },

    /// The provider answered with a non-2xx status
    #[error("{endpoint} responded with status {status}")]
    Rejected { endpoint: &'static str, status: u16 },

    #[error("{endpoint} returned an unexpected payload: {reason}")]
    Malformed {
        endpoint: &'static str,
        reason: String,
    },
}

impl ProviderError {
    /// Whether the provider itself refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ProviderError::Rejected { .. })
    }

    fn from_reqwest(endpoint: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            ProviderError::Timeout { endpoint }
        } else {
            ProviderError::Transport { endpoint, source }
        }
    }

    fn metric_status(&self) -> String {
        match self {
            ProviderError::Transport { .. } => "error".to_string(),
            ProviderError::Timeout { .. } => "timeout".to_string(),
            ProviderError::Rejected { status, .. } => status.to_string(),
            ProviderError::Malformed { .. } => "malformed".to_string(),
        }
    }
}

/// Short-lived token returned by the authorize step
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Identity asserted by the provider after a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub external_id: String,
    pub email: String,
}

/// Result of verifying a logout webhook token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutVerdict {
    /// The provider confirmed that this identity logged out
    Confirmed { external_id: String },
    /// The provider did not confirm the logout
    Rejected { reason: Option<String> },
}

// =============================================================================
// Wire formats
// =============================================================================

/// Provider ids arrive as either JSON strings or numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawExternalId {
    Text(String),
    Number(serde_json::Number),
}

impl RawExternalId {
    fn into_string(self) -> Option<String> {
        let value = match self {
            RawExternalId::Text(text) => text.trim().to_string(),
            RawExternalId::Number(number) => number.to_string(),
        };
        (!value.is_empty()).then_some(value)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    info: Option<InfoPayload>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoPayload {
    id: Option<RawExternalId>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogoutResponse {
    #[serde(default)]
    success: bool,
    clef_id: Option<RawExternalId>,
    error: Option<String>,
}

fn missing(endpoint: &'static str, field: &str, error: Option<String>) -> ProviderError {
    let reason = match error {
        Some(error) => format!("missing `{field}` (provider error: {error})"),
        None => format!("missing `{field}`"),
    };
    ProviderError::Malformed { endpoint, reason }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the identity provider API
///
/// Every call is bounded by the configured request timeout. Nothing is
/// retried: one failed step fails the whole handshake.
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    app_secret: String,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("wavelogin/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Run the full handshake for an authorization code.
    pub async fn authenticate(&self, code: &str) -> Result<ProviderIdentity, ProviderError> {
        let token = self.exchange_code(code).await?;
        self.fetch_info(&token).await
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<AccessToken, ProviderError> {
        let request = self.http.post(self.endpoint_url(AUTHORIZE_ENDPOINT)).form(&[
            ("app_id", self.app_id.as_str()),
            ("app_secret", self.app_secret.as_str()),
            ("code", code),
        ]);

        let response: TokenResponse = self.send(AUTHORIZE_ENDPOINT, request).await?;
        response
            .access_token
            .filter(|token| !token.is_empty())
            .map(AccessToken)
            .ok_or_else(|| missing(AUTHORIZE_ENDPOINT, "access_token", response.error))
    }

    /// Exchange an access token for the user's identity.
    pub async fn fetch_info(&self, token: &AccessToken) -> Result<ProviderIdentity, ProviderError> {
        let request = self
            .http
            .get(self.endpoint_url(INFO_ENDPOINT))
            .query(&[("access_token", token.as_str())]);

        let response: InfoResponse = self.send(INFO_ENDPOINT, request).await?;
        let Some(info) = response.info else {
            return Err(missing(INFO_ENDPOINT, "info", response.error));
        };

        let external_id = info
            .id
            .and_then(RawExternalId::into_string)
            .ok_or_else(|| missing(INFO_ENDPOINT, "info.id", None))?;
        let email = info
            .email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
            .ok_or_else(|| missing(INFO_ENDPOINT, "info.email", None))?;

        Ok(ProviderIdentity { external_id, email })
    }

    /// Ask the provider which identity a logout webhook token belongs to.
    pub async fn verify_logout(&self, logout_token: &str) -> Result<LogoutVerdict, ProviderError> {
        let request = self.http.post(self.endpoint_url(LOGOUT_ENDPOINT)).form(&[
            ("app_id", self.app_id.as_str()),
            ("app_secret", self.app_secret.as_str()),
            ("logout_token", logout_token),
        ]);

        let response: LogoutResponse = self.send(LOGOUT_ENDPOINT, request).await?;
        if !response.success {
            return Ok(LogoutVerdict::Rejected {
                reason: response.error,
            });
        }

        match response.clef_id.and_then(RawExternalId::into_string) {
            Some(external_id) => Ok(LogoutVerdict::Confirmed { external_id }),
            None => Err(missing(LOGOUT_ENDPOINT, "clef_id", response.error)),
        }
    }

    /// Send a request and decode a 2xx JSON body.
    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let started = Instant::now();
        let result = Self::send_inner(endpoint, request).await;

        let status = match &result {
            Ok(_) => "ok".to_string(),
            Err(error) => error.metric_status(),
        };
        observe_provider_request(endpoint, &status, started.elapsed());
        tracing::debug!(
            endpoint,
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Identity provider call finished"
        );

        result
    }

    async fn send_inner<T: DeserializeOwned>(
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::from_reqwest(endpoint, e))?;

        serde_json::from_slice(&body).map_err(|e| ProviderError::Malformed {
            endpoint,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout_ms: u64) -> ProviderClient {
        ProviderClient::new(&ProviderConfig {
            base_url: server.uri(),
            app_id: "test-app".to_string(),
            app_secret: "test-secret".to_string(),
            request_timeout_ms: timeout_ms,
            button_script_url: "https://clef.io/v3/clef.js".to_string(),
        })
        .expect("client builds")
    }

    #[tokio::test]
    async fn authenticate_runs_both_steps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/authorize"))
            .and(body_string_contains("app_id=test-app"))
            .and(body_string_contains("app_secret=test-secret"))
            .and(body_string_contains("code=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .and(query_param("access_token", "tok1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "info": {"id": "ext-1", "email": "a@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let identity = client_for(&server, 2000).authenticate("abc").await.unwrap();
        assert_eq!(
            identity,
            ProviderIdentity {
                external_id: "ext-1".to_string(),
                email: "a@example.com".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn numeric_ids_are_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "info": {"id": 1234567, "email": "a@example.com"}
            })))
            .mount(&server)
            .await;

        let identity = client_for(&server, 2000)
            .fetch_info(&AccessToken("tok".to_string()))
            .await
            .unwrap();
        assert_eq!(identity.external_id, "1234567");
    }

    #[tokio::test]
    async fn non_success_status_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/authorize"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "Invalid code"})))
            .mount(&server)
            .await;

        let error = client_for(&server, 2000)
            .authenticate("expired")
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ProviderError::Rejected { endpoint: "authorize", status: 403 }
        ));
        assert!(error.is_rejection());
    }

    #[tokio::test]
    async fn missing_access_token_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/authorize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "Invalid App ID."})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let error = client_for(&server, 2000).authenticate("abc").await.unwrap_err();
        match error {
            ProviderError::Malformed { endpoint, reason } => {
                assert_eq!(endpoint, "authorize");
                assert!(reason.contains("access_token"));
                assert!(reason.contains("Invalid App ID."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let error = client_for(&server, 2000)
            .fetch_info(&AccessToken("tok".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(error, ProviderError::Malformed { endpoint: "info", .. }));
    }

    #[tokio::test]
    async fn info_without_email_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"info": {"id": "ext-1"}})))
            .mount(&server)
            .await;

        let error = client_for(&server, 2000)
            .fetch_info(&AccessToken("tok".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(error, ProviderError::Malformed { endpoint: "info", .. }));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/authorize"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok1"}))
                    .set_delay(Duration::from_millis(1500)),
            )
            .mount(&server)
            .await;

        let error = client_for(&server, 200).authenticate("abc").await.unwrap_err();
        assert!(matches!(error, ProviderError::Timeout { endpoint: "authorize" }));
    }

    #[tokio::test]
    async fn verify_logout_confirms_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logout"))
            .and(body_string_contains("logout_token=tok2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "clef_id": "ext-1"
            })))
            .mount(&server)
            .await;

        let verdict = client_for(&server, 2000).verify_logout("tok2").await.unwrap();
        assert_eq!(
            verdict,
            LogoutVerdict::Confirmed {
                external_id: "ext-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn verify_logout_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logout"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": "Invalid logout token."
            })))
            .mount(&server)
            .await;

        let verdict = client_for(&server, 2000).verify_logout("bad").await.unwrap();
        assert_eq!(
            verdict,
            LogoutVerdict::Rejected {
                reason: Some("Invalid logout token.".to_string())
            }
        );
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken("secret-token".to_string());
        assert_eq!(format!("{token:?}"), "AccessToken(..)");
    }
}
