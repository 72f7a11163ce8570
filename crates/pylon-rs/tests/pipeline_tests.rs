//! End-to-end pipeline behavior against a programmable stub upstream:
//! breaker tripping and recovery, cache hits, retry/Retry-After
//! handling, deadlines and cancellation.

mod common;

use common::{build_pipeline, fast_retry, spawn_stub, StubMode};
use pylon_rs::models::error::GatewayError;
use pylon_rs::services::catalog::INFOBLOX_API;
use pylon_rs::services::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use pylon_rs::services::pipeline::{CacheDirective, PipelineRequest, RetryPolicy};
use pylon_rs::services::upstream::UpstreamRequest;
use serde_json::json;
use std::time::{Duration, Instant};

fn read_request(tool: &str, path: &str, cache: Option<CacheDirective>) -> PipelineRequest {
    PipelineRequest {
        tool: tool.to_string(),
        request: UpstreamRequest::get(INFOBLOX_API, path.to_string()),
        cache,
        deadline: Duration::from_secs(30),
    }
}

fn default_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig { failure_threshold: 5, reset_timeout: Duration::from_secs(60) }
}

#[actix_web::test]
async fn breaker_opens_after_five_consecutive_server_errors() {
    let stub = spawn_stub(StubMode::Status(500)).await;
    let fixture = build_pipeline(&stub.base_url, fast_retry(12), default_breaker(), false);

    for _ in 0..5 {
        let err = fixture
            .pipeline
            .execute(read_request("list_auth_zones", "/api/ddi/v1/dns/auth_zone", None), &fixture.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamServerError { status: 500, .. }));
    }
    assert_eq!(stub.hits(), 5);

    // Sixth call fails fast without touching the upstream.
    let started = Instant::now();
    let err = fixture
        .pipeline
        .execute(read_request("list_auth_zones", "/api/ddi/v1/dns/auth_zone", None), &fixture.ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(stub.hits(), 5);
    assert_eq!(
        fixture
            .metrics
            .counter_value("circuit_breaker_open_total", &[("service", INFOBLOX_API)]),
        1
    );
}

#[actix_web::test]
async fn breaker_threshold_boundary_is_exact() {
    let stub = spawn_stub(StubMode::Status(502)).await;
    let fixture = build_pipeline(
        &stub.base_url,
        fast_retry(1),
        CircuitBreakerConfig { failure_threshold: 3, reset_timeout: Duration::from_secs(60) },
        false,
    );
    let breaker = fixture.pipeline.breaker(INFOBLOX_API);

    for _ in 0..2 {
        let _ = fixture
            .pipeline
            .execute(read_request("list_subnets", "/api/ddi/v1/ipam/subnet", None), &fixture.ctx)
            .await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);

    let _ = fixture
        .pipeline
        .execute(read_request("list_subnets", "/api/ddi/v1/ipam/subnet", None), &fixture.ctx)
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[actix_web::test]
async fn breaker_recovers_through_half_open_probe() {
    let stub = spawn_stub(StubMode::Status(500)).await;
    let fixture = build_pipeline(
        &stub.base_url,
        fast_retry(1),
        CircuitBreakerConfig { failure_threshold: 1, reset_timeout: Duration::from_millis(100) },
        false,
    );

    let _ = fixture
        .pipeline
        .execute(read_request("list_auth_zones", "/api/ddi/v1/dns/auth_zone", None), &fixture.ctx)
        .await;
    assert_eq!(fixture.pipeline.breaker(INFOBLOX_API).state(), CircuitState::Open);

    // Service comes back; after the reset window a probe closes the
    // breaker again.
    stub.set_mode(StubMode::Ok(json!({"results": []})));
    tokio::time::sleep(Duration::from_millis(150)).await;
    let result = fixture
        .pipeline
        .execute(read_request("list_auth_zones", "/api/ddi/v1/dns/auth_zone", None), &fixture.ctx)
        .await
        .unwrap();
    assert_eq!(result, json!({"results": []}));
    assert_eq!(fixture.pipeline.breaker(INFOBLOX_API).state(), CircuitState::Closed);
    assert_eq!(
        fixture
            .metrics
            .gauge_value("circuit_breaker_state", &[("service", INFOBLOX_API)]),
        Some(0.0)
    );
}

#[actix_web::test]
async fn cache_hit_skips_the_upstream() {
    let payload = json!({"results": [{"id": "ipam/ip_space/1", "name": "corp"}]});
    let stub = spawn_stub(StubMode::Ok(payload.clone())).await;
    let fixture = build_pipeline(&stub.base_url, fast_retry(1), default_breaker(), true);
    let cache = Some(CacheDirective { argument_hash: 42, ttl: Duration::from_secs(60) });

    let first = fixture
        .pipeline
        .execute(read_request("list_ip_spaces", "/api/ddi/v1/ipam/ip_space", cache), &fixture.ctx)
        .await
        .unwrap();
    let second = fixture
        .pipeline
        .execute(read_request("list_ip_spaces", "/api/ddi/v1/ipam/ip_space", cache), &fixture.ctx)
        .await
        .unwrap();

    assert_eq!(stub.hits(), 1);
    assert_eq!(first, payload);
    assert_eq!(second, first);
    assert_eq!(
        fixture.metrics.counter_value("cache_hits_total", &[("tool", "list_ip_spaces")]),
        1
    );
    assert_eq!(
        fixture.metrics.counter_value("cache_misses_total", &[("tool", "list_ip_spaces")]),
        1
    );
    // Hits plus misses account for every cache-eligible call.
    assert_eq!(
        fixture.metrics.counter_total("cache_hits_total")
            + fixture.metrics.counter_total("cache_misses_total"),
        2
    );
}

#[actix_web::test]
async fn cache_entries_expire_at_ttl() {
    let stub = spawn_stub(StubMode::Ok(json!({"results": []}))).await;
    let fixture = build_pipeline(&stub.base_url, fast_retry(1), default_breaker(), true);
    let cache = Some(CacheDirective { argument_hash: 7, ttl: Duration::from_millis(80) });

    let request = || read_request("list_subnets", "/api/ddi/v1/ipam/subnet", cache);
    fixture.pipeline.execute(request(), &fixture.ctx).await.unwrap();
    fixture.pipeline.execute(request(), &fixture.ctx).await.unwrap();
    assert_eq!(stub.hits(), 1);

    tokio::time::sleep(Duration::from_millis(120)).await;
    fixture.pipeline.execute(request(), &fixture.ctx).await.unwrap();
    assert_eq!(stub.hits(), 2);
}

#[actix_web::test]
async fn retry_honors_retry_after_and_recovers() {
    let payload = json!({"results": [{"id": "subnet-1"}]});
    let stub = spawn_stub(StubMode::FailThenOk {
        status: 429,
        retry_after: Some(1),
        remaining: 2,
        then: payload.clone(),
    })
    .await;
    let fixture = build_pipeline(&stub.base_url, fast_retry(12), default_breaker(), false);

    let started = Instant::now();
    let result = fixture
        .pipeline
        .execute(read_request("list_subnets", "/api/ddi/v1/ipam/subnet", None), &fixture.ctx)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result, payload);
    assert_eq!(stub.hits(), 3);
    // Two Retry-After: 1 sleeps bound the total wall time from below.
    assert!(elapsed >= Duration::from_secs(2), "elapsed {:?}", elapsed);
    assert_eq!(
        fixture
            .metrics
            .counter_value("api_retries_total", &[("endpoint", "/api/ddi/v1/ipam/subnet")]),
        2
    );
    // Rate limiting never trips the breaker.
    assert_eq!(fixture.pipeline.breaker(INFOBLOX_API).state(), CircuitState::Closed);
}

#[actix_web::test]
async fn rate_limit_exhaustion_surfaces_retry_after() {
    let stub = spawn_stub(StubMode::FailThenOk {
        status: 429,
        retry_after: Some(1),
        remaining: 99,
        then: json!({}),
    })
    .await;
    let fixture = build_pipeline(
        &stub.base_url,
        RetryPolicy {
            max_attempts: 2,
            base: Duration::from_millis(10),
            cap: Duration::from_millis(20),
            retry_server_errors: false,
        },
        default_breaker(),
        false,
    );

    let err = fixture
        .pipeline
        .execute(read_request("list_subnets", "/api/ddi/v1/ipam/subnet", None), &fixture.ctx)
        .await
        .unwrap_err();
    match err {
        GatewayError::RateLimited { retry_after } => assert_eq!(retry_after, Some(1)),
        other => panic!("expected RateLimited, got {:?}", other),
    }
    assert_eq!(stub.hits(), 2);
}

#[actix_web::test]
async fn server_errors_retry_when_opted_in() {
    let payload = json!({"ok": true});
    let stub = spawn_stub(StubMode::FailThenOk {
        status: 503,
        retry_after: None,
        remaining: 2,
        then: payload.clone(),
    })
    .await;
    let fixture = build_pipeline(
        &stub.base_url,
        RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(10),
            cap: Duration::from_millis(20),
            retry_server_errors: true,
        },
        default_breaker(),
        false,
    );

    let result = fixture
        .pipeline
        .execute(read_request("list_auth_zones", "/api/ddi/v1/dns/auth_zone", None), &fixture.ctx)
        .await
        .unwrap();
    assert_eq!(result, payload);
    assert_eq!(stub.hits(), 3);
}

#[actix_web::test]
async fn deadline_expiry_is_a_timeout_and_not_a_breaker_failure() {
    let stub = spawn_stub(StubMode::Sleep(Duration::from_secs(5))).await;
    let fixture = build_pipeline(&stub.base_url, fast_retry(1), default_breaker(), false);

    let started = Instant::now();
    let err = fixture
        .pipeline
        .execute(
            PipelineRequest {
                tool: "list_auth_zones".to_string(),
                request: UpstreamRequest::get(INFOBLOX_API, "/api/ddi/v1/dns/auth_zone"),
                cache: None,
                deadline: Duration::from_millis(150),
            },
            &fixture.ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(fixture.pipeline.breaker(INFOBLOX_API).failure_count(), 0);
}

#[actix_web::test]
async fn cancelled_call_leaves_cache_and_breaker_untouched() {
    let stub = spawn_stub(StubMode::Sleep(Duration::from_millis(500))).await;
    let fixture = build_pipeline(&stub.base_url, fast_retry(1), default_breaker(), true);
    let cache = Some(CacheDirective { argument_hash: 9, ttl: Duration::from_secs(60) });

    let pipeline = fixture.pipeline.clone();
    let ctx = fixture.ctx.clone();
    let call = tokio::spawn(async move {
        pipeline
            .execute(
                read_request("list_ip_spaces", "/api/ddi/v1/ipam/ip_space", cache),
                &ctx,
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    fixture.cancel();
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));
    assert_eq!(fixture.cache.entry_count(), 0);
    assert_eq!(fixture.pipeline.breaker(INFOBLOX_API).failure_count(), 0);
}

#[actix_web::test]
async fn transport_failures_count_toward_the_breaker() {
    // Nothing listens on port 9; connections are refused.
    let fixture = build_pipeline(
        "http://127.0.0.1:9",
        fast_retry(1),
        CircuitBreakerConfig { failure_threshold: 2, reset_timeout: Duration::from_secs(60) },
        false,
    );

    for _ in 0..2 {
        let err = fixture
            .pipeline
            .execute(read_request("list_subnets", "/api/ddi/v1/ipam/subnet", None), &fixture.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::TransportError { .. }));
    }
    let err = fixture
        .pipeline
        .execute(read_request("list_subnets", "/api/ddi/v1/ipam/subnet", None), &fixture.ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
}
