//! Transport seam between adapters and the network.
//!
//! Adapters build [`HttpRequest`] values and hand them to an [`HttpClient`];
//! tests substitute canned clients, production uses [`ReqwestHttpClient`].

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Credentials attached to a source's requests.
#[derive(Clone, PartialEq, Eq)]
pub enum HttpAuth {
    BearerToken(String),
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BearerToken(_) => f.write_str("BearerToken(<redacted>)"),
        }
    }
}

/// One upstream call. Header names are stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }

    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        let mut request = Self::get(url).with_header("content-type", "application/json");
        request.method = HttpMethod::Post;
        request.body = Some(body.to_string());
        request
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Appends URL-encoded query parameters.
    pub fn with_query(mut self, params: &[(&str, &str)]) -> Self {
        for (name, value) in params {
            let separator = if self.url.contains('?') { '&' } else { '?' };
            self.url = format!(
                "{}{separator}{}={}",
                self.url,
                urlencoding::encode(name),
                urlencoding::encode(value)
            );
        }
        self
    }

    pub fn with_auth(self, auth: &HttpAuth) -> Self {
        match auth {
            HttpAuth::BearerToken(token) => self.with_header("authorization", format!("Bearer {token}")),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// How an upstream status code is treated by the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 401/403: credentials rejected or client blocked.
    Blocked,
    /// 408, 425, 429 and 5xx.
    Retryable,
    /// Anything else; the endpoint or payload is not what the adapter expects.
    Unexpected,
}

impl StatusClass {
    pub const fn of(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            401 | 403 => Self::Blocked,
            408 | 425 | 429 | 500..=599 => Self::Retryable,
            _ => Self::Unexpected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn class(&self) -> StatusClass {
        StatusClass::of(self.status)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.class(), StatusClass::Success)
    }
}

/// Failure below the HTTP layer: no status code was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    /// Timeouts, refused connections, truncated bodies.
    #[error("{0}")]
    Transient(String),
    /// The request itself could not be built or sent.
    #[error("{0}")]
    Fatal(String),
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Fatal(message) => message,
        }
    }

    pub const fn retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// reqwest-backed transport with a cookie jar shared across a source's
/// store requests.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("terpstock/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_send_error(error: reqwest::Error) -> HttpError {
    if error.is_builder() {
        HttpError::non_retryable(format!("invalid request: {error}"))
    } else if error.is_timeout() {
        HttpError::new(format!("request timed out: {error}"))
    } else {
        HttpError::new(format!("request failed: {error}"))
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let HttpRequest {
                method,
                url,
                headers,
                body,
                timeout_ms,
            } = request;
            let method = match method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
            };

            let mut builder = self
                .client
                .request(method, url)
                .timeout(Duration::from_millis(timeout_ms));
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(classify_send_error)?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|error| HttpError::new(format!("body read failed: {error}")))?;
            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_lands_in_the_authorization_header() {
        let request = HttpRequest::get("https://menus.test/products")
            .with_auth(&HttpAuth::BearerToken(String::from("salve-123")));

        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer salve-123")
        );
        assert!(!format!("{:?}", HttpAuth::BearerToken(String::from("salve-123"))).contains("salve"));
    }

    #[test]
    fn query_parameters_are_encoded_and_chained() {
        let request = HttpRequest::get("https://menus.test/products")
            .with_query(&[("retailer", "miami 1"), ("page", "2")]);

        assert_eq!(request.url, "https://menus.test/products?retailer=miami%201&page=2");
    }

    #[test]
    fn json_post_sets_method_body_and_content_type() {
        let request = HttpRequest::post_json("https://menus.test/graphql", &serde_json::json!({"page": 1}));

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.body.as_deref(), Some(r#"{"page":1}"#));
        assert_eq!(
            request.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn status_codes_fall_into_pipeline_classes() {
        assert_eq!(StatusClass::of(204), StatusClass::Success);
        assert_eq!(StatusClass::of(401), StatusClass::Blocked);
        assert_eq!(StatusClass::of(403), StatusClass::Blocked);
        assert_eq!(StatusClass::of(429), StatusClass::Retryable);
        assert_eq!(StatusClass::of(503), StatusClass::Retryable);
        assert_eq!(StatusClass::of(404), StatusClass::Unexpected);
    }
}
