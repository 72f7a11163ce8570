//! Admin surface: metrics exposition and health, on its own listener.
//!
//! The admin listener is never exposed to RPC clients; it reads from
//! observability state and nothing else.
//!
//! | Path            | Format                         |
//! |-----------------|--------------------------------|
//! | `/`             | JSON index with uptime         |
//! | `/metrics`      | Prometheus text v0.0.4         |
//! | `/metrics/json` | JSON registry snapshot         |
//! | `/health`       | JSON report, 503 when unhealthy|

use crate::services::health::{HealthEvaluator, HealthStatus};
use crate::services::metrics::MetricsRegistry;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use std::sync::Arc;

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub metrics: Arc<MetricsRegistry>,
    pub health: Arc<HealthEvaluator>,
    pub tool_count: usize,
}

/// Registers the admin routes.
pub fn configure_admin(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/metrics", web::get().to(metrics_text))
        .route("/metrics/json", web::get().to(metrics_json))
        .route("/health", web::get().to(health));
}

async fn index(state: web::Data<AdminState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "service": "pylon-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.metrics.uptime_seconds(),
        "tools_registered": state.tool_count,
        "endpoints": {
            "/": "this index",
            "/metrics": "Prometheus text exposition",
            "/metrics/json": "metrics snapshot as JSON",
            "/health": "derived health status",
        },
    })))
}

async fn metrics_text(state: web::Data<AdminState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(state.metrics.render_prometheus()))
}

async fn metrics_json(state: web::Data<AdminState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.metrics.snapshot()))
}

/// Readiness/liveness endpoint. Degraded still serves traffic, so it
/// stays 200; only unhealthy flips to 503.
async fn health(state: web::Data<AdminState>) -> Result<HttpResponse> {
    let report = state.health.evaluate();
    let response = match report.status {
        HealthStatus::Unhealthy => HttpResponse::ServiceUnavailable().json(&report),
        _ => HttpResponse::Ok().json(&report),
    };
    Ok(response)
}
