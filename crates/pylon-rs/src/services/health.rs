//! Derived health status for the admin surface.
//!
//! Health is computed from the metric registers and breaker states at
//! request time. Nothing is cached; the evaluator is a pure read.
//!
//! * `healthy` - no breaker open, 5-minute error rate under 5%
//! * `degraded` - a breaker half-open or freshly opened, error rate
//!   in [5%, 25%), or cache hit rate under the configured floor
//! * `unhealthy` - a breaker open for over a minute, or error rate at
//!   or above 25%

use crate::services::circuit_breaker::CircuitState;
use crate::services::metrics::MetricsRegistry;
use crate::services::pipeline::ResiliencePipeline;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Breaker open longer than this flips health to unhealthy.
const OPEN_TOO_LONG: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Snapshot of one breaker for the health payload.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    pub service: String,
    pub state: String,
    pub seconds_in_state: u64,
}

/// Headline numbers surfaced alongside the status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub rpc_requests_total: u64,
    pub rpc_errors_total: u64,
    pub error_rate_5m: Option<f64>,
    pub cache_hit_rate: f64,
    pub active_sessions: f64,
    pub breakers: Vec<BreakerHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub issues: Vec<String>,
    pub metrics: HealthMetrics,
}

/// Computes health from live registers.
pub struct HealthEvaluator {
    metrics: Arc<MetricsRegistry>,
    pipeline: Arc<ResiliencePipeline>,
    cache_hit_rate_floor: f64,
}

impl HealthEvaluator {
    pub fn new(
        metrics: Arc<MetricsRegistry>,
        pipeline: Arc<ResiliencePipeline>,
        cache_hit_rate_floor: f64,
    ) -> Arc<Self> {
        Arc::new(Self { metrics, pipeline, cache_hit_rate_floor })
    }

    pub fn evaluate(&self) -> HealthReport {
        let mut issues = Vec::new();
        let mut status = HealthStatus::Healthy;

        let breakers: Vec<(String, CircuitState, Duration)> = self.pipeline.breaker_states();
        for (service, state, in_state) in &breakers {
            match state {
                CircuitState::Open if *in_state > OPEN_TOO_LONG => {
                    issues.push(format!(
                        "circuit breaker for {} open for {}s",
                        service,
                        in_state.as_secs()
                    ));
                    status = HealthStatus::Unhealthy;
                }
                CircuitState::Open => {
                    issues.push(format!("circuit breaker for {} is open", service));
                    status = worst(status, HealthStatus::Degraded);
                }
                CircuitState::HalfOpen => {
                    issues.push(format!("circuit breaker for {} is recovering", service));
                    status = worst(status, HealthStatus::Degraded);
                }
                CircuitState::Closed => {}
            }
        }

        let error_rate = self.metrics.recent_error_rate();
        if let Some(rate) = error_rate {
            if rate >= 0.25 {
                issues.push(format!("error rate {:.1}% over the last 5 minutes", rate * 100.0));
                status = HealthStatus::Unhealthy;
            } else if rate >= 0.05 {
                issues.push(format!("elevated error rate {:.1}%", rate * 100.0));
                status = worst(status, HealthStatus::Degraded);
            }
        }

        let hit_rate = self.metrics.cache_hit_rate();
        let eligible = self.metrics.counter_total("cache_hits_total")
            + self.metrics.counter_total("cache_misses_total");
        if self.cache_hit_rate_floor > 0.0 && eligible > 0 && hit_rate < self.cache_hit_rate_floor {
            issues.push(format!(
                "cache hit rate {:.1}% below floor {:.1}%",
                hit_rate * 100.0,
                self.cache_hit_rate_floor * 100.0
            ));
            status = worst(status, HealthStatus::Degraded);
        }

        // Healthy requires established uptime; a probe landing in the
        // first second after bootstrap reports degraded, not healthy.
        let uptime_seconds = self.metrics.uptime_seconds();
        if uptime_seconds == 0 {
            issues.push("uptime not yet established".to_string());
            status = worst(status, HealthStatus::Degraded);
        }

        HealthReport {
            status,
            uptime_seconds,
            issues,
            metrics: HealthMetrics {
                rpc_requests_total: self.metrics.counter_total("rpc_requests_total"),
                rpc_errors_total: self.metrics.counter_total("rpc_errors_total"),
                error_rate_5m: error_rate,
                cache_hit_rate: hit_rate,
                active_sessions: self
                    .metrics
                    .gauge_value("active_sessions", &[])
                    .unwrap_or(0.0),
                breakers: breakers
                    .into_iter()
                    .map(|(service, state, in_state)| BreakerHealth {
                        service,
                        state: state.as_str().to_string(),
                        seconds_in_state: in_state.as_secs(),
                    })
                    .collect(),
            },
        }
    }
}

fn worst(current: HealthStatus, candidate: HealthStatus) -> HealthStatus {
    match (current, candidate) {
        (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
        (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    }
}
