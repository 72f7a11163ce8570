//! The resilience pipeline wrapping every upstream call.
//!
//! Each tool invocation flows through the stages below, in order:
//!
//! 1. deadline guard (tool override or configured default)
//! 2. circuit breaker gate for the target service
//! 3. cache lookup (read tools with a TTL policy only)
//! 4. upstream invocation via the client
//! 5. retry on retryable failures, backoff + jitter, `Retry-After`
//!    honored
//! 6. breaker update (counted failures only)
//! 7. cache insert on successful cacheable reads
//! 8. metrics, structured events and span emission
//!
//! Cancellation and the deadline race the whole stage chain: when
//! either fires the in-flight future is dropped at its await point,
//! which is what keeps a cancelled call from mutating the cache or
//! the breaker counters.
//!
//! Concurrent identical calls may both miss the cache and both hit
//! the upstream; there is no single-flight map. Last insert wins.

use crate::logs::events;
use crate::models::error::GatewayError;
use crate::services::cache::ToolCache;
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Transition};
use crate::services::metrics::MetricsRegistry;
use crate::services::trace::{SpanBuilder, SpanStatus, Tracer};
use crate::services::upstream::{UpstreamClient, UpstreamError, UpstreamRequest};
use crate::utils::cancel::CancelToken;
use log::Level;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Retry policy applied by stage 5.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    /// 5xx responses retry only when this is set; 429, transport
    /// failures and upstream timeouts always retry.
    pub retry_server_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            base: Duration::from_secs(5),
            cap: Duration::from_secs(30),
            retry_server_errors: false,
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the sleep before retry `attempt`
    /// (1-based): linear in the attempt number, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base
            .checked_mul(attempt)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    fn should_retry(&self, error: &UpstreamError) -> bool {
        match error {
            UpstreamError::RateLimited { .. }
            | UpstreamError::Transport { .. }
            | UpstreamError::Timeout => true,
            UpstreamError::ServerError { .. } => self.retry_server_errors,
            UpstreamError::ClientError { .. } => false,
        }
    }
}

/// Bounded random addition on top of the deterministic backoff,
/// de-synchronizing retry herds against shared rate-limited
/// endpoints.
fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=250))
}

/// Caching directive for one pipeline call, resolved by the registry
/// from the tool descriptor. `None` bypasses the cache entirely,
/// which is how mutations are kept out of it.
#[derive(Debug, Clone, Copy)]
pub struct CacheDirective {
    pub argument_hash: u64,
    pub ttl: Duration,
}

/// One call through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Tool name, used for metric labels and cache keys.
    pub tool: String,
    pub request: UpstreamRequest,
    pub cache: Option<CacheDirective>,
    pub deadline: Duration,
}

/// Per-call context threaded down from the transport.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub correlation_id: String,
    pub parent_span_id: Option<String>,
    pub cancel: CancelToken,
}

/// The assembled pipeline; one per process, shared by every handler.
pub struct ResiliencePipeline {
    upstream: Arc<UpstreamClient>,
    cache: Arc<ToolCache>,
    metrics: Arc<MetricsRegistry>,
    tracer: Arc<Tracer>,
    retry: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<&'static str, Arc<CircuitBreaker>>>,
}

impl ResiliencePipeline {
    pub fn new(
        upstream: Arc<UpstreamClient>,
        cache: Arc<ToolCache>,
        metrics: Arc<MetricsRegistry>,
        tracer: Arc<Tracer>,
        retry: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            upstream,
            cache,
            metrics,
            tracer,
            retry,
            breaker_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for a logical service, created lazily with the
    /// configured thresholds.
    pub fn breaker(&self, service: &'static str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(service) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write().unwrap();
        breakers
            .entry(service)
            .or_insert_with(|| {
                CircuitBreaker::new(service.to_string(), self.breaker_config.clone())
            })
            .clone()
    }

    /// Snapshot of every breaker for the health evaluator and admin
    /// surface.
    pub fn breaker_states(&self) -> Vec<(String, CircuitState, Duration)> {
        self.breakers
            .read()
            .unwrap()
            .values()
            .map(|b| (b.name().to_string(), b.state(), b.time_in_state()))
            .collect()
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    /// Runs one call through all eight stages.
    pub async fn execute(
        &self,
        request: PipelineRequest,
        ctx: &CallContext,
    ) -> Result<Value, GatewayError> {
        let deadline = request.deadline;
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(GatewayError::Cancelled),
            outcome = tokio::time::timeout(deadline, self.execute_inner(&request, ctx)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout { seconds: deadline.as_secs() }),
                }
            }
        }
    }

    async fn execute_inner(
        &self,
        request: &PipelineRequest,
        ctx: &CallContext,
    ) -> Result<Value, GatewayError> {
        let service = request.request.service;
        let breaker = self.breaker(service);

        let mut span = SpanBuilder::with_parent(
            "upstream_request",
            &ctx.correlation_id,
            ctx.parent_span_id.as_deref(),
        );
        span.set_attr("service", service);
        span.set_attr("method", request.request.method.as_str());
        span.set_attr("path", request.request.path.clone());
        span.set_attr("breaker_state", breaker.state().as_str());

        // Stage 2: breaker gate.
        match breaker.try_acquire() {
            Ok(transition) => {
                if let Some(transition) = transition {
                    self.report_transition(service, &transition, &ctx.correlation_id);
                }
            }
            Err(()) => {
                span.set_attr("error_kind", "circuit_open");
                self.tracer.export(span.finish(SpanStatus::Error));
                return Err(GatewayError::CircuitOpen { service: service.to_string() });
            }
        }
        // A dropped future (cancel, deadline) must not leave the
        // half-open probe slot claimed forever. Only the call that
        // actually holds the probe arms the guard.
        let probe_guard = ProbeGuard {
            breaker: breaker.clone(),
            armed: breaker.state() == CircuitState::HalfOpen,
        };

        // Stage 3: cache lookup.
        if let Some(directive) = &request.cache {
            if let Some(value) = self.cache.get(&request.tool, directive.argument_hash) {
                self.metrics
                    .incr("cache_hits_total", &[("tool", &request.tool)]);
                events::emit(
                    Level::Debug,
                    "cache_hit",
                    &ctx.correlation_id,
                    &[("tool", json!(request.tool)), ("ttl_seconds", json!(directive.ttl.as_secs()))],
                );
                span.set_attr("cache_outcome", "hit");
                span.set_attr("attempts", 0);
                self.tracer.export(span.finish(SpanStatus::Ok));
                return Ok(value);
            }
            self.metrics
                .incr("cache_misses_total", &[("tool", &request.tool)]);
            events::emit(
                Level::Debug,
                "cache_miss",
                &ctx.correlation_id,
                &[("tool", json!(request.tool))],
            );
            span.set_attr("cache_outcome", "miss");
        } else {
            span.set_attr("cache_outcome", "bypass");
        }

        // Stages 4-6: invocation with retry and breaker updates.
        let mut attempt: u32 = 1;
        let outcome = loop {
            if attempt > 1 {
                // Re-check the gate: a transport storm inside this
                // very loop can have opened the breaker.
                if breaker.try_acquire().is_err() {
                    break Err(GatewayError::CircuitOpen { service: service.to_string() });
                }
            }

            let attempt_start = Instant::now();
            let result = self.upstream.send(&request.request).await;
            let elapsed_ms = attempt_start.elapsed().as_secs_f64() * 1000.0;
            self.metrics.observe(
                "upstream_request_duration_ms",
                &[("service", service), ("path", &request.request.path)],
                elapsed_ms,
            );

            match result {
                Ok(response) => {
                    self.metrics.incr(
                        "upstream_requests_total",
                        &[("service", service), ("status", "ok")],
                    );
                    if let Some(transition) = breaker.on_success() {
                        self.report_transition(service, &transition, &ctx.correlation_id);
                    }
                    span.set_attr("status", response.status);
                    break Ok(response.body);
                }
                Err(error) => {
                    self.metrics.incr(
                        "upstream_requests_total",
                        &[("service", service), ("status", "error")],
                    );
                    // Stage 6: only server errors and transport
                    // failures count toward the breaker; client
                    // errors, rate limits and timeouts never do.
                    if matches!(
                        error,
                        UpstreamError::ServerError { .. } | UpstreamError::Transport { .. }
                    ) {
                        if let Some(transition) = breaker.on_failure() {
                            self.report_transition(service, &transition, &ctx.correlation_id);
                        }
                    }

                    if self.retry.should_retry(&error) && attempt < self.retry.max_attempts {
                        let sleep = match &error {
                            UpstreamError::RateLimited { retry_after: Some(secs) } => {
                                Duration::from_secs(*secs)
                            }
                            _ => self.retry.backoff(attempt) + jitter(),
                        };
                        self.metrics.incr(
                            "api_retries_total",
                            &[("endpoint", &request.request.path)],
                        );
                        events::emit(
                            Level::Warn,
                            "api_retry",
                            &ctx.correlation_id,
                            &[
                                ("attempt", json!(attempt)),
                                ("max", json!(self.retry.max_attempts)),
                                ("sleep", json!(sleep.as_secs_f64())),
                                ("endpoint", json!(request.request.path)),
                                ("status", json!(error.status())),
                            ],
                        );
                        tokio::time::sleep(sleep).await;
                        attempt += 1;
                        continue;
                    }

                    if let Some(status) = error.status() {
                        span.set_attr("status", status);
                    }
                    break Err(self.surface_error(error, request.deadline));
                }
            }
        };
        drop(probe_guard);

        span.set_attr("attempts", attempt);

        // Stage 7: cache insert on successful cacheable reads.
        if let (Ok(value), Some(directive)) = (&outcome, &request.cache) {
            if !ctx.cancel.is_cancelled() {
                self.cache
                    .insert(&request.tool, directive.argument_hash, value.clone(), directive.ttl);
            }
        }
        self.metrics
            .set_gauge("cache_entries", &[], self.cache.entry_count() as f64);

        match &outcome {
            Ok(_) => self.tracer.export(span.finish(SpanStatus::Ok)),
            Err(error) => {
                span.set_attr("error_kind", error.kind());
                self.tracer.export(span.finish(SpanStatus::Error));
            }
        }
        outcome
    }

    /// Maps an exhausted upstream error into the outward taxonomy.
    fn surface_error(&self, error: UpstreamError, deadline: Duration) -> GatewayError {
        match error {
            UpstreamError::ClientError { status, body } => {
                GatewayError::UpstreamClientError { status, message: body }
            }
            UpstreamError::ServerError { status, body } => {
                GatewayError::UpstreamServerError { status, message: body }
            }
            UpstreamError::RateLimited { retry_after } => GatewayError::RateLimited { retry_after },
            UpstreamError::Transport { message } => GatewayError::TransportError { message },
            UpstreamError::Timeout => GatewayError::Timeout { seconds: deadline.as_secs() },
        }
    }

    fn report_transition(&self, service: &'static str, transition: &Transition, correlation_id: &str) {
        self.metrics.set_gauge(
            "circuit_breaker_state",
            &[("service", service)],
            transition.to.gauge_value(),
        );
        if transition.to == CircuitState::Open {
            self.metrics
                .incr("circuit_breaker_open_total", &[("service", service)]);
        }
        events::emit(
            Level::Warn,
            "circuit_breaker_state_change",
            correlation_id,
            &[
                ("service", json!(service)),
                ("from", json!(transition.from.as_str())),
                ("to", json!(transition.to.as_str())),
            ],
        );
    }
}

/// Releases the half-open probe slot if the owning future is dropped
/// mid-flight. Redundant after a normal on_success/on_failure, where
/// the release is idempotent.
struct ProbeGuard {
    breaker: Arc<CircuitBreaker>,
    armed: bool,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe();
        }
    }
}
