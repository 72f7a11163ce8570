//! Metrics exposition, health evaluation and the admin surface.

mod common;

use actix_web::{test, web, App};
use common::{build_pipeline, fast_retry, TestPipeline};
use pylon_rs::routes::admin::{configure_admin, AdminState};
use pylon_rs::services::catalog::{ATCFW_API, INFOBLOX_API};
use pylon_rs::services::circuit_breaker::CircuitBreakerConfig;
use pylon_rs::services::health::{HealthEvaluator, HealthStatus};
use serde_json::Value;
use std::time::Duration;

fn fixture() -> TestPipeline {
    // No traffic flows in these tests; the base URL is never dialed.
    build_pipeline(
        "http://127.0.0.1:9",
        fast_retry(1),
        CircuitBreakerConfig { failure_threshold: 5, reset_timeout: Duration::from_secs(60) },
        true,
    )
}

#[actix_web::test]
async fn health_degrades_and_recovers_with_breaker_state() {
    // Short reset window so the recovery probe is admitted quickly.
    let fixture = build_pipeline(
        "http://127.0.0.1:9",
        fast_retry(1),
        CircuitBreakerConfig { failure_threshold: 5, reset_timeout: Duration::from_millis(5) },
        true,
    );
    let health = HealthEvaluator::new(fixture.metrics.clone(), fixture.pipeline.clone(), 0.0);

    // Healthy only once uptime is established.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let report = health.evaluate();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.issues.is_empty());

    // A freshly opened breaker degrades; it takes a minute of
    // sustained openness to become unhealthy.
    let breaker = fixture.pipeline.breaker(INFOBLOX_API);
    for _ in 0..5 {
        breaker.on_failure();
    }
    let report = health.evaluate();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.issues.iter().any(|i| i.contains("infoblox_api")));

    // Recovery through the half-open probe clears the issue.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let _ = breaker.try_acquire();
    breaker.on_success();
    let report = health.evaluate();
    assert_eq!(report.status, HealthStatus::Healthy);
}

#[actix_web::test]
async fn health_is_degraded_until_uptime_is_established() {
    let fixture = fixture();
    let health = HealthEvaluator::new(fixture.metrics.clone(), fixture.pipeline.clone(), 0.0);

    // Immediately after bootstrap: no breakers open, no traffic, but
    // zero uptime keeps the gateway out of healthy.
    let report = health.evaluate();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.uptime_seconds, 0);
    assert!(report.issues.iter().any(|i| i.contains("uptime")));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let report = health.evaluate();
    assert_eq!(report.status, HealthStatus::Healthy);
}

#[actix_web::test]
async fn health_tracks_the_recent_error_rate() {
    let fixture = fixture();
    let health = HealthEvaluator::new(fixture.metrics.clone(), fixture.pipeline.clone(), 0.0);

    // 10% errors: degraded.
    for _ in 0..9 {
        fixture.metrics.record_outcome(true);
    }
    fixture.metrics.record_outcome(false);
    let report = health.evaluate();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.metrics.error_rate_5m, Some(0.1));

    // Push past 25%: unhealthy.
    for _ in 0..5 {
        fixture.metrics.record_outcome(false);
    }
    let report = health.evaluate();
    assert_eq!(report.status, HealthStatus::Unhealthy);
}

#[actix_web::test]
async fn health_flags_a_cold_cache_when_a_floor_is_configured() {
    let fixture = fixture();
    let health = HealthEvaluator::new(fixture.metrics.clone(), fixture.pipeline.clone(), 0.5);

    // One miss, zero hits: 0% hit rate, below the 50% floor.
    fixture.metrics.incr("cache_misses_total", &[("tool", "list_subnets")]);
    let report = health.evaluate();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.issues.iter().any(|i| i.contains("cache hit rate")));
}

#[actix_web::test]
async fn admin_surface_exposes_index_metrics_and_health() {
    let fixture = fixture();
    let health = HealthEvaluator::new(fixture.metrics.clone(), fixture.pipeline.clone(), 0.0);
    fixture.metrics.incr(
        "rpc_requests_total",
        &[("tool", "list_ip_spaces"), ("status", "ok")],
    );
    fixture.metrics.observe("rpc_request_duration_ms", &[("tool", "list_ip_spaces")], 12.5);
    fixture
        .metrics
        .set_gauge("circuit_breaker_state", &[("service", ATCFW_API)], 0.0);

    let state = AdminState {
        metrics: fixture.metrics.clone(),
        health,
        tool_count: 34,
    };
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_admin),
    )
    .await;

    let index: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert_eq!(index["service"], "pylon-gateway");
    assert!(index["endpoints"]["/metrics"].is_string());

    let response =
        test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(response.status(), 200);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    let body = test::read_body(response).await;
    let text = std::str::from_utf8(&body).unwrap();
    assert!(text.contains("# TYPE rpc_requests_total counter"));
    assert!(text.contains("rpc_requests_total{status=\"ok\",tool=\"list_ip_spaces\"} 1"));
    assert!(text.contains("# TYPE circuit_breaker_state gauge"));
    assert!(text.contains("uptime_seconds"));
    assert!(text.contains("cache_hit_rate"));
    assert!(text.contains("rpc_request_duration_ms{quantile=\"0.5\",tool=\"list_ip_spaces\"}"));

    let snapshot: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/metrics/json").to_request(),
    )
    .await;
    assert!(snapshot["uptime_seconds"].is_u64());
    assert!(snapshot["counters"].as_array().unwrap().iter().any(|c| {
        c["name"] == "rpc_requests_total" && c["value"] == 1
    }));
    assert!(snapshot["histograms"].as_array().unwrap().iter().any(|h| {
        h["name"] == "rpc_request_duration_ms" && h["value"]["count"] == 1
    }));

    let response =
        test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(response.status(), 200);
    let report: Value = test::read_body_json(response).await;
    assert_eq!(report["status"], "healthy");
}

#[actix_web::test]
async fn unhealthy_status_returns_503() {
    let fixture = fixture();
    let health = HealthEvaluator::new(fixture.metrics.clone(), fixture.pipeline.clone(), 0.0);
    for _ in 0..4 {
        fixture.metrics.record_outcome(false);
    }

    let state = AdminState { metrics: fixture.metrics.clone(), health, tool_count: 34 };
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_admin),
    )
    .await;

    let response =
        test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(response.status(), 503);
    let report: Value = test::read_body_json(response).await;
    assert_eq!(report["status"], "unhealthy");
    assert!(!report["issues"].as_array().unwrap().is_empty());
}
