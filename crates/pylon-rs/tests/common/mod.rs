//! Shared test fixtures: a programmable stub upstream and a pipeline
//! factory wired against it.
//
// Each integration test binary compiles this module independently and
// uses a different subset of it.
#![allow(dead_code)]

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use pylon_rs::services::cache::ToolCache;
use pylon_rs::services::circuit_breaker::CircuitBreakerConfig;
use pylon_rs::services::metrics::MetricsRegistry;
use pylon_rs::services::pipeline::{CallContext, ResiliencePipeline, RetryPolicy};
use pylon_rs::services::trace::Tracer;
use pylon_rs::services::upstream::UpstreamClient;
use pylon_rs::utils::cancel::{cancel_pair, CancelHandle};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the stub upstream does with the next requests.
#[derive(Debug, Clone)]
pub enum StubMode {
    /// Always 200 with this body.
    Ok(Value),
    /// Always this status with a small JSON body.
    Status(u16),
    /// Fail `remaining` times with `status` (and optional
    /// `Retry-After`), then 200 with `then`.
    FailThenOk { status: u16, retry_after: Option<u64>, remaining: usize, then: Value },
    /// Sleep before answering 200; long enough to trip deadlines.
    Sleep(Duration),
}

struct StubState {
    hits: AtomicUsize,
    mode: Mutex<StubMode>,
    last_idempotency_key: Mutex<Option<String>>,
    last_uri: Mutex<Option<String>>,
}

/// Handle to a running stub upstream.
pub struct StubUpstream {
    pub base_url: String,
    state: Arc<StubState>,
}

impl StubUpstream {
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn set_mode(&self, mode: StubMode) {
        *self.state.mode.lock().unwrap() = mode;
    }

    pub fn last_idempotency_key(&self) -> Option<String> {
        self.state.last_idempotency_key.lock().unwrap().clone()
    }

    pub fn last_uri(&self) -> Option<String> {
        self.state.last_uri.lock().unwrap().clone()
    }
}

async fn stub_handler(req: HttpRequest, state: web::Data<Arc<StubState>>) -> HttpResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_uri.lock().unwrap() = Some(req.uri().to_string());
    if let Some(key) = req.headers().get("x-idempotency-key") {
        *state.last_idempotency_key.lock().unwrap() =
            key.to_str().ok().map(str::to_string);
    }

    let mode = state.mode.lock().unwrap().clone();
    match mode {
        StubMode::Ok(body) => HttpResponse::Ok().json(body),
        StubMode::Status(code) => HttpResponse::build(
            actix_web::http::StatusCode::from_u16(code).unwrap(),
        )
        .json(json!({"error": "stub failure"})),
        StubMode::FailThenOk { status, retry_after, remaining, then } => {
            if remaining > 0 {
                *state.mode.lock().unwrap() = StubMode::FailThenOk {
                    status,
                    retry_after,
                    remaining: remaining - 1,
                    then: then.clone(),
                };
                let mut builder = HttpResponse::build(
                    actix_web::http::StatusCode::from_u16(status).unwrap(),
                );
                if let Some(secs) = retry_after {
                    builder.insert_header(("retry-after", secs.to_string()));
                }
                builder.json(json!({"error": "try later"}))
            } else {
                HttpResponse::Ok().json(then)
            }
        }
        StubMode::Sleep(duration) => {
            tokio::time::sleep(duration).await;
            HttpResponse::Ok().json(json!({"slept": true}))
        }
    }
}

/// Starts a stub upstream on an OS-assigned port. The server lives on
/// the test's actix system until the test ends.
pub async fn spawn_stub(mode: StubMode) -> StubUpstream {
    let state = Arc::new(StubState {
        hits: AtomicUsize::new(0),
        mode: Mutex::new(mode),
        last_idempotency_key: Mutex::new(None),
        last_uri: Mutex::new(None),
    });
    let data = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(data.clone()))
            .default_service(web::route().to(stub_handler))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .expect("stub bind");
    let addr = server.addrs()[0];
    tokio::spawn(server.run());
    StubUpstream { base_url: format!("http://{}", addr), state }
}

/// Everything a pipeline test needs, bundled.
pub struct TestPipeline {
    pub pipeline: Arc<ResiliencePipeline>,
    pub metrics: Arc<MetricsRegistry>,
    pub cache: Arc<ToolCache>,
    // Dropping the root handle would cancel every derived token, so
    // it rides along with the fixture.
    cancel_root: CancelHandle,
    pub ctx: CallContext,
}

/// Builds a pipeline against the stub with test-friendly policies.
pub fn build_pipeline(
    base_url: &str,
    retry: RetryPolicy,
    breaker: CircuitBreakerConfig,
    cache_enabled: bool,
) -> TestPipeline {
    let metrics = Arc::new(MetricsRegistry::default());
    let (tracer, _) = Tracer::new(None);
    let cache = Arc::new(ToolCache::new(cache_enabled, 1000));
    let upstream = Arc::new(UpstreamClient::new(base_url, "test-token").expect("client"));
    let pipeline = Arc::new(ResiliencePipeline::new(
        upstream,
        cache.clone(),
        metrics.clone(),
        tracer,
        retry,
        breaker,
    ));
    let (cancel_root, token) = cancel_pair();
    let ctx = CallContext {
        correlation_id: "test-correlation".to_string(),
        parent_span_id: None,
        cancel: token,
    };
    TestPipeline { pipeline, metrics, cache, cancel_root, ctx }
}

impl TestPipeline {
    /// Cancels every call issued with this fixture's context.
    pub fn cancel(&self) {
        self.cancel_root.cancel();
    }
}

/// Fast retry policy so tests do not sleep for real backoff windows.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base: Duration::from_millis(20),
        cap: Duration::from_millis(100),
        retry_server_errors: false,
    }
}
