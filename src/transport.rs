use std::time::Duration;

use reqwest::{header::HeaderName, Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use crate::attestation::AttestationError;

pub const DEFAULT_API_KEY_HEADER: &str = "X-API-KEY";

const LOG_TARGET: &str = "transport";

/// How a service expects the API key to be presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    None,
    /// Key sent verbatim in the named header.
    ApiKeyHeader(String),
    /// `Authorization: Bearer <key>`
    Bearer,
}

impl Default for AuthScheme {
    fn default() -> Self {
        AuthScheme::ApiKeyHeader(DEFAULT_API_KEY_HEADER.to_owned())
    }
}

/// Where a service lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: Url,
    pub auth: AuthScheme,
    pub api_key: Option<String>,
}

impl ServiceConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            auth: AuthScheme::None,
            api_key: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthScheme, api_key: Option<String>) -> Self {
        self.auth = auth;
        self.api_key = api_key;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound for a single request, connect included.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Joins `path` onto `base` so that the result does not depend on whether
/// `base` carries a trailing slash or `path` a leading one.
pub fn join_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
}

/// JSON-over-HTTP helper shared by every phase talking to one service.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    service: ServiceConfig,
}

impl HttpTransport {
    pub fn new(service: ServiceConfig, config: &TransportConfig) -> Result<Self, AttestationError> {
        if let AuthScheme::ApiKeyHeader(name) = &service.auth {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                AttestationError::InvalidRequest(format!("invalid API key header {name:?}: {e}"))
            })?;
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| AttestationError::transport(None, e))?;
        Ok(Self { client, service })
    }

    pub fn url(&self, path: &str) -> Result<Url, AttestationError> {
        join_url(&self.service.base_url, path).map_err(|e| {
            AttestationError::InvalidRequest(format!(
                "cannot join {path:?} onto {}: {e}",
                self.service.base_url
            ))
        })
    }

    /// POSTs `body` as JSON. Each call is bounded by the configured timeout.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<RawResponse, AttestationError> {
        let url = self.url(path)?;
        let request = self.authorize(self.client.post(url.clone()).json(body))?;
        log::debug!(target: LOG_TARGET, "POST {}", url);

        let response = request
            .send()
            .await
            .map_err(|e| classify_send_error(&url, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_send_error(&url, e))?;
        log::trace!(target: LOG_TARGET, "{} answered {}: {}", url, status, body);

        Ok(RawResponse { status, body })
    }

    fn authorize(&self, builder: RequestBuilder) -> Result<RequestBuilder, AttestationError> {
        match &self.service.auth {
            AuthScheme::None => Ok(builder),
            AuthScheme::ApiKeyHeader(name) => Ok(builder.header(name.as_str(), self.api_key()?)),
            AuthScheme::Bearer => Ok(builder.bearer_auth(self.api_key()?)),
        }
    }

    fn api_key(&self) -> Result<&str, AttestationError> {
        match self.service.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(AttestationError::Auth {
                status: None,
                message: format!("no API key configured for {}", self.service.base_url),
            }),
        }
    }
}

fn classify_send_error(url: &Url, e: reqwest::Error) -> AttestationError {
    if e.is_timeout() {
        AttestationError::transport(None, format!("request to {url} timed out"))
    } else {
        AttestationError::transport(e.status().map(|s| s.as_u16()), format!("{url}: {e}"))
    }
}

/// Status and body of a completed exchange, before any interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    pub fn error_body(&self) -> ErrorBody {
        self.json().unwrap_or_default()
    }

    pub fn failure_message(&self) -> String {
        match self.error_body().describe() {
            Some(message) => message,
            None if self.body.trim().is_empty() => self
                .status
                .canonical_reason()
                .unwrap_or("no reason given")
                .to_owned(),
            None => self.body.chars().take(200).collect(),
        }
    }

    /// Maps a non-2xx answer to `Auth` or `Transport`. An auth code in the
    /// body's `statusCode` wins over the HTTP status.
    pub fn classify_failure(&self) -> AttestationError {
        let status = match self.error_body().status_code {
            Some(code) if is_auth_status(code) => code,
            _ => self.status.as_u16(),
        };
        failure(status, self.failure_message())
    }

    /// Failure the verifier reports inside a 2xx body through `statusCode`.
    pub fn embedded_failure(&self) -> Option<AttestationError> {
        let body = self.error_body();
        let code = body.status_code?;
        let message = body.describe().unwrap_or_else(|| "unknown error".to_owned());
        Some(failure(code, message))
    }
}

fn failure(status: u16, message: String) -> AttestationError {
    if is_auth_status(status) {
        AttestationError::Auth {
            status: Some(status),
            message,
        }
    } else {
        AttestationError::Transport {
            status: Some(status),
            message,
        }
    }
}

pub fn is_auth_status(status: u16) -> bool {
    status == StatusCode::UNAUTHORIZED.as_u16() || status == StatusCode::FORBIDDEN.as_u16()
}

/// Error shapes returned by the verifier (`statusCode`/`message`) and the
/// DA layer (`error`).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: Option<u16>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl ErrorBody {
    pub fn describe(&self) -> Option<String> {
        match (self.message.as_deref(), self.error.as_deref()) {
            (Some(message), _) if !message.is_empty() => Some(message.to_owned()),
            (_, Some(error)) if !error.is_empty() => Some(error.to_owned()),
            _ => self.status_code.map(|code| format!("status code {code}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_ignores_trailing_slash_on_base() {
        let with = Url::parse("https://verifier.example/").unwrap();
        let without = Url::parse("https://verifier.example").unwrap();
        assert_eq!(
            join_url(&with, "verifier/eth/EVMTransaction/prepareRequest").unwrap(),
            join_url(&without, "verifier/eth/EVMTransaction/prepareRequest").unwrap()
        );

        let with = Url::parse("https://da.example/coston2/").unwrap();
        let without = Url::parse("https://da.example/coston2").unwrap();
        let joined = join_url(&without, "/api/v1/fdc/proof-by-request-round-raw").unwrap();
        assert_eq!(
            joined,
            join_url(&with, "api/v1/fdc/proof-by-request-round-raw").unwrap()
        );
        assert_eq!(
            joined.as_str(),
            "https://da.example/coston2/api/v1/fdc/proof-by-request-round-raw"
        );
        assert!(!joined.path().contains("//"));
    }

    #[test]
    fn test_invalid_header_name_is_rejected_up_front() {
        let service = ServiceConfig::new(Url::parse("http://127.0.0.1:9/").unwrap()).with_auth(
            AuthScheme::ApiKeyHeader("bad header".to_owned()),
            Some("key".to_owned()),
        );
        let result = HttpTransport::new(service, &TransportConfig::default());
        assert!(matches!(result, Err(AttestationError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_any_request() {
        for auth in [AuthScheme::default(), AuthScheme::Bearer] {
            // Nothing listens on the discard port; reaching the network would give `Transport`.
            let service =
                ServiceConfig::new(Url::parse("http://127.0.0.1:9/").unwrap()).with_auth(auth, None);
            let transport = HttpTransport::new(service, &TransportConfig::default()).unwrap();
            let result = transport.post_json("prepareRequest", &serde_json::json!({})).await;
            assert!(matches!(
                result,
                Err(AttestationError::Auth { status: None, .. })
            ));
        }
    }

    #[test]
    fn test_failure_message_prefers_service_message() {
        let response = RawResponse {
            status: StatusCode::UNAUTHORIZED,
            body: r#"{"statusCode":401,"message":"invalid api key"}"#.to_owned(),
        };
        assert!(matches!(
            response.classify_failure(),
            AttestationError::Auth { status: Some(401), message } if message == "invalid api key"
        ));

        let response = RawResponse {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(matches!(
            response.classify_failure(),
            AttestationError::Transport { status: Some(502), message } if message == "Bad Gateway"
        ));
    }

    #[test]
    fn test_auth_code_in_body_is_classified_as_auth() {
        let response = RawResponse {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"statusCode":401,"message":"Unauthorized"}"#.to_owned(),
        };
        assert!(matches!(
            response.classify_failure(),
            AttestationError::Auth { status: Some(401), message } if message == "Unauthorized"
        ));

        let response = RawResponse {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"statusCode":422,"message":"bad hash"}"#.to_owned(),
        };
        assert!(matches!(
            response.classify_failure(),
            AttestationError::Transport { status: Some(400), .. }
        ));
    }

    #[test]
    fn test_embedded_failure_in_success_body() {
        let ok = |body: &str| RawResponse {
            status: StatusCode::OK,
            body: body.to_owned(),
        };
        assert!(matches!(
            ok(r#"{"statusCode":403,"message":"forbidden"}"#).embedded_failure(),
            Some(AttestationError::Auth { status: Some(403), .. })
        ));
        assert!(matches!(
            ok(r#"{"statusCode":500}"#).embedded_failure(),
            Some(AttestationError::Transport { status: Some(500), message }) if message == "status code 500"
        ));
        assert!(ok(r#"{"roundId":7}"#).embedded_failure().is_none());
        assert!(ok("not json").embedded_failure().is_none());
    }
}
