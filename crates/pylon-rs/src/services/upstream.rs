//! Thin authenticated HTTP client for the upstream SaaS REST API.
//!
//! `UpstreamClient` is deliberately dumb: one request in, one
//! response or classified error out. Retries, caching, breaker logic
//! and metrics all live in the resilience pipeline; keeping them out
//! of this layer means every pipeline stage observes exactly one
//! upstream attempt.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Connect timeout applied to every upstream call.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout applied to every upstream call.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Classified outcome of a single upstream attempt.
///
/// The pipeline's retry stage keys off these variants: `RateLimited`,
/// `Transport` and `Timeout` are always retryable, `ServerError` only
/// when configured, `ClientError` never.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream returned {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("upstream returned {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("upstream rate limited the request")]
    RateLimited { retry_after: Option<u64> },

    #[error("transport failure: {message}")]
    Transport { message: String },

    #[error("upstream request timed out")]
    Timeout,
}

impl UpstreamError {
    /// HTTP status associated with the error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::ClientError { status, .. }
            | UpstreamError::ServerError { status, .. } => Some(*status),
            UpstreamError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// Raw result of a successful upstream call.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

/// A fully described upstream request, built by tool handlers and
/// executed (possibly several times) by the pipeline.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Logical upstream service the breaker keys on
    /// (`infoblox_api`, `atcfw_api`).
    pub service: &'static str,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Idempotency fingerprint forwarded on mutations.
    pub idempotency_key: Option<String>,
}

impl UpstreamRequest {
    pub fn get(service: &'static str, path: impl Into<String>) -> Self {
        Self::new(service, Method::GET, path)
    }

    pub fn post(service: &'static str, path: impl Into<String>, body: Value) -> Self {
        let mut req = Self::new(service, Method::POST, path);
        req.body = Some(body);
        req
    }

    pub fn patch(service: &'static str, path: impl Into<String>, body: Value) -> Self {
        let mut req = Self::new(service, Method::PATCH, path);
        req.body = Some(body);
        req
    }

    pub fn delete(service: &'static str, path: impl Into<String>) -> Self {
        Self::new(service, Method::DELETE, path)
    }

    fn new(service: &'static str, method: Method, path: impl Into<String>) -> Self {
        Self {
            service,
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            idempotency_key: None,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_idempotency_key(mut self, key: String) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// Pooled, authenticated client bound to one upstream base URL.
///
/// Cloning is cheap; the underlying reqwest client shares its
/// connection pool across clones.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    token: String,
}

impl UpstreamClient {
    /// Builds the client with connection pooling and fixed timeouts.
    ///
    /// # Errors
    ///
    /// Fails only when the TLS backend cannot initialize, which is a
    /// bootstrap-fatal condition.
    pub fn new(base_url: &str, token: &str) -> Result<Self, String> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .default_headers(default_headers)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Executes one attempt of `request`. Never retries.
    pub async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(AUTHORIZATION, format!("Token {}", self.token));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("X-Idempotency-Key", key);
        }

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let headers = flatten_headers(response.headers());
        let retry_after = parse_retry_after(response.headers());

        let text = response.text().await.map_err(classify_transport)?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text.clone()));

        if status.is_success() {
            return Ok(UpstreamResponse { status: status.as_u16(), headers, body });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited { retry_after });
        }
        let truncated = truncate_body(&text);
        if status.is_client_error() {
            Err(UpstreamError::ClientError { status: status.as_u16(), body: truncated })
        } else {
            Err(UpstreamError::ServerError { status: status.as_u16(), body: truncated })
        }
    }

    /// Base URL the client is bound to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn classify_transport(error: reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Transport {
            // reqwest error strings may embed the full URL; keep the
            // source chain out of wire-visible messages.
            message: error.to_string(),
        }
    }
}

fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Upstream error bodies can be large HTML pages; cap what we carry
/// around in errors and logs.
fn truncate_body(text: &str) -> String {
    const MAX: usize = 512;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}
