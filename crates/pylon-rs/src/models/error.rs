//! Gateway error taxonomy with wire and HTTP response mappings.
//!
//! Every failure surfaced to an RPC client is one of the kinds below.
//! The resilience pipeline classifies upstream failures into this
//! taxonomy; the transport layer serializes them into `error` frames.

use actix_web::HttpResponse;
use serde_json::json;

/// Errors surfaced to RPC clients and across internal component
/// boundaries.
///
/// The `kind` string of each variant is stable: it appears in error
/// frames, metric labels and structured logs, so renaming one is a
/// wire-format change.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Arguments failed schema validation at the registry boundary.
    #[error("schema violation: {message}")]
    SchemaViolation { message: String },

    /// Tool name not present in the registry.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// Upstream returned a non-retryable 4xx.
    #[error("upstream client error {status}: {message}")]
    UpstreamClientError { status: u16, message: String },

    /// Upstream returned 5xx and retries (if any) were exhausted.
    #[error("upstream server error {status}: {message}")]
    UpstreamServerError { status: u16, message: String },

    /// 429 responses exhausted the retry budget.
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<u64> },

    /// Circuit breaker for the target service is open.
    #[error("circuit breaker open for service {service}")]
    CircuitOpen { service: String },

    /// The call deadline elapsed before a terminal upstream outcome.
    #[error("deadline of {seconds}s exceeded")]
    Timeout { seconds: u64 },

    /// Network-level failure talking to the upstream, retries
    /// exhausted.
    #[error("transport error: {message}")]
    TransportError { message: String },

    /// The client disconnected or the session was closed mid-call.
    #[error("call cancelled")]
    Cancelled,

    /// Protocol violation on the transport (bad session, bad state).
    #[error("session error: {message}")]
    Session { message: String },
}

impl GatewayError {
    /// Stable snake_case kind token used in error frames, logs and
    /// metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::SchemaViolation { .. } => "schema_violation",
            GatewayError::UnknownTool { .. } => "unknown_tool",
            GatewayError::UpstreamClientError { .. } => "upstream_client_error",
            GatewayError::UpstreamServerError { .. } => "upstream_server_error",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::TransportError { .. } => "transport_error",
            GatewayError::Cancelled => "cancelled",
            GatewayError::Session { .. } => "session_error",
        }
    }

    /// Whether the client may reasonably retry the call later.
    ///
    /// Mirrors the retry-advice column surfaced to clients: schema
    /// violations and plain 4xx are client bugs, everything transient
    /// is retryable.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. }
                | GatewayError::CircuitOpen { .. }
                | GatewayError::Timeout { .. }
                | GatewayError::UpstreamServerError { .. }
                | GatewayError::TransportError { .. }
        )
    }

    /// Suggested delay before a retry, when the upstream provided one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        let body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        match self {
            GatewayError::SchemaViolation { .. }
            | GatewayError::UnknownTool { .. }
            | GatewayError::Session { .. } => HttpResponse::BadRequest().json(body),
            GatewayError::Timeout { .. } => HttpResponse::GatewayTimeout().json(body),
            GatewayError::RateLimited { .. } => HttpResponse::TooManyRequests().json(body),
            GatewayError::CircuitOpen { .. } => HttpResponse::ServiceUnavailable().json(body),
            _ => HttpResponse::BadGateway().json(body),
        }
    }
}
