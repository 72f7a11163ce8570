//! Environment-driven gateway configuration.
//!
//! Every runtime knob is read from a `PYLON_*` environment variable
//! with a production-sensible default; only the upstream credential
//! is mandatory. [`Settings::from_env`] never panics; bootstrap
//! surfaces the error and exits non-zero.

use serde::Serialize;
use std::env;
use std::time::Duration;

/// Complete runtime configuration for the gateway.
///
/// The struct is serializable so the admin index can echo the active
/// (credential-redacted) configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Base URL of the upstream SaaS REST API.
    pub upstream_base_url: String,

    /// Bearer credential injected as `Authorization: Token <key>`.
    /// Never serialized.
    #[serde(skip_serializing)]
    pub upstream_token: String,

    /// Bind address shared by both listeners.
    pub bind_address: String,

    /// RPC transport listener port.
    pub rpc_port: u16,

    /// Admin surface listener port.
    pub admin_port: u16,

    /// Global cache toggle; when off, every policy degrades to NONE.
    pub cache_enabled: bool,

    /// Default TTL for tools declaring `Ttl` without a value.
    pub cache_ttl_seconds: u64,

    /// Per-tool cache entry bound (LRU eviction on overflow).
    pub cache_capacity: usize,

    /// Default per-call deadline.
    pub request_timeout_seconds: u64,

    /// Consecutive counted failures that open a breaker.
    pub breaker_failure_threshold: u64,

    /// Seconds an open breaker waits before admitting a probe.
    pub breaker_reset_seconds: u64,

    /// Retry attempt ceiling per call.
    pub retry_max_attempts: u32,

    /// Backoff base; the n-th retry sleeps `base * n`, capped below.
    pub retry_base_seconds: u64,

    /// Backoff cap.
    pub retry_cap_seconds: u64,

    /// Opt-in retries for 5xx responses. 429, transport failures and
    /// upstream timeouts retry regardless.
    pub retry_server_errors: bool,

    /// Idle seconds before a session is swept.
    pub session_idle_seconds: u64,

    /// Span collector endpoint; empty disables trace export.
    pub trace_endpoint: Option<String>,

    /// `json` or `console`.
    pub log_format: String,

    /// Log level filter.
    pub log_level: String,

    /// Cache hit-rate below which health degrades (0.0 disables).
    pub cache_hit_rate_floor: f64,

    /// Grace period for in-flight call cancellation at shutdown.
    pub shutdown_grace_seconds: u64,
}

impl Settings {
    /// Loads settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when the credential is
    /// missing or any variable fails to parse; bootstrap treats this
    /// as fatal.
    pub fn from_env() -> Result<Self, String> {
        let upstream_token = env::var("PYLON_UPSTREAM_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                "PYLON_UPSTREAM_TOKEN is not set; the gateway cannot authenticate \
                 against the upstream API"
                    .to_string()
            })?;

        let settings = Self {
            upstream_base_url: var_or("PYLON_UPSTREAM_BASE_URL", "https://csp.infoblox.com"),
            upstream_token,
            bind_address: var_or("PYLON_BIND_ADDRESS", "0.0.0.0"),
            rpc_port: parse_var("PYLON_RPC_PORT", 8000)?,
            admin_port: parse_var("PYLON_ADMIN_PORT", 8001)?,
            cache_enabled: parse_var("PYLON_CACHE_ENABLED", true)?,
            cache_ttl_seconds: parse_var("PYLON_CACHE_TTL_SECONDS", 300)?,
            cache_capacity: parse_var("PYLON_CACHE_CAPACITY", 1000)?,
            request_timeout_seconds: parse_var("PYLON_REQUEST_TIMEOUT_SECONDS", 30)?,
            breaker_failure_threshold: parse_var("PYLON_BREAKER_FAILURE_THRESHOLD", 5)?,
            breaker_reset_seconds: parse_var("PYLON_BREAKER_RESET_SECONDS", 60)?,
            retry_max_attempts: parse_var("PYLON_RETRY_MAX_ATTEMPTS", 12)?,
            retry_base_seconds: parse_var("PYLON_RETRY_BASE_SECONDS", 5)?,
            retry_cap_seconds: parse_var("PYLON_RETRY_CAP_SECONDS", 30)?,
            retry_server_errors: parse_var("PYLON_RETRY_SERVER_ERRORS", false)?,
            session_idle_seconds: parse_var("PYLON_SESSION_IDLE_SECONDS", 300)?,
            trace_endpoint: env::var("PYLON_TRACE_ENDPOINT").ok().filter(|e| !e.is_empty()),
            log_format: var_or("PYLON_LOG_FORMAT", "console"),
            log_level: var_or("PYLON_LOG_LEVEL", "info"),
            cache_hit_rate_floor: parse_var("PYLON_CACHE_HIT_RATE_FLOOR", 0.0)?,
            shutdown_grace_seconds: parse_var("PYLON_SHUTDOWN_GRACE_SECONDS", 10)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validates cross-field consistency.
    pub fn validate(&self) -> Result<(), String> {
        if !self.upstream_base_url.starts_with("http://")
            && !self.upstream_base_url.starts_with("https://")
        {
            return Err(format!(
                "PYLON_UPSTREAM_BASE_URL must include a scheme, got '{}'",
                self.upstream_base_url
            ));
        }
        if self.rpc_port == self.admin_port {
            return Err(format!(
                "PYLON_RPC_PORT and PYLON_ADMIN_PORT must differ (both {})",
                self.rpc_port
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err("PYLON_RETRY_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.breaker_failure_threshold == 0 {
            return Err("PYLON_BREAKER_FAILURE_THRESHOLD must be at least 1".to_string());
        }
        if self.retry_cap_seconds < self.retry_base_seconds {
            return Err(format!(
                "PYLON_RETRY_CAP_SECONDS ({}) is below PYLON_RETRY_BASE_SECONDS ({})",
                self.retry_cap_seconds, self.retry_base_seconds
            ));
        }
        if !matches!(self.log_format.as_str(), "json" | "console") {
            return Err(format!(
                "PYLON_LOG_FORMAT must be 'json' or 'console', got '{}'",
                self.log_format
            ));
        }
        if !(0.0..=1.0).contains(&self.cache_hit_rate_floor) {
            return Err(format!(
                "PYLON_CACHE_HIT_RATE_FLOOR must be within [0.0, 1.0], got {}",
                self.cache_hit_rate_floor
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn breaker_reset(&self) -> Duration {
        Duration::from_secs(self.breaker_reset_seconds)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_seconds)
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{} has an unparseable value '{}'", name, raw)),
    }
}
