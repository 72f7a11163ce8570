//! Pylon tool-gateway server.
//!
//! Binary entry point: loads configuration from the environment,
//! wires the upstream client, resilience pipeline, tool registry,
//! session table and observability together, then serves the RPC
//! transport and the admin surface on separate listeners until a
//! shutdown signal arrives.

use pylon_rs::config::settings::Settings;
use pylon_rs::logs::{events, logger::configure_logger};
use pylon_rs::routes::admin::{configure_admin, AdminState};
use pylon_rs::routes::{rpc, sse, GatewayState};
use pylon_rs::services::catalog;
use pylon_rs::services::cache::ToolCache;
use pylon_rs::services::circuit_breaker::CircuitBreakerConfig;
use pylon_rs::services::health::HealthEvaluator;
use pylon_rs::services::metrics::MetricsRegistry;
use pylon_rs::services::pipeline::{ResiliencePipeline, RetryPolicy};
use pylon_rs::services::registry::{RegistryConfig, ToolRegistry};
use pylon_rs::services::session::SessionManager;
use pylon_rs::services::trace::Tracer;
use pylon_rs::services::upstream::UpstreamClient;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

/// Sweep interval for idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[actix_web::main]
async fn main() {
    if let Err(message) = run().await {
        // The logger may not be installed yet when bootstrap fails.
        eprintln!("pylon-gateway failed to start: {}", message);
        error!("startup failed: {}", message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let settings = Settings::from_env()?;
    configure_logger(&settings.log_format, &settings.log_level);
    info!(
        "starting pylon-gateway v{} against {}",
        env!("CARGO_PKG_VERSION"),
        settings.upstream_base_url
    );

    // Observability first; everything else reports into it.
    let metrics = Arc::new(MetricsRegistry::default());
    let (tracer, exporter) = Tracer::new(settings.trace_endpoint.clone());
    if let Some(exporter) = exporter {
        info!("trace export enabled");
        tokio::spawn(exporter.run());
    }

    let upstream = Arc::new(UpstreamClient::new(
        &settings.upstream_base_url,
        &settings.upstream_token,
    )?);
    let cache = Arc::new(ToolCache::new(settings.cache_enabled, settings.cache_capacity));
    let pipeline = Arc::new(ResiliencePipeline::new(
        upstream,
        cache,
        metrics.clone(),
        tracer.clone(),
        RetryPolicy {
            max_attempts: settings.retry_max_attempts,
            base: Duration::from_secs(settings.retry_base_seconds),
            cap: Duration::from_secs(settings.retry_cap_seconds),
            retry_server_errors: settings.retry_server_errors,
        },
        CircuitBreakerConfig {
            failure_threshold: settings.breaker_failure_threshold,
            reset_timeout: settings.breaker_reset(),
        },
    ));
    // Known services get their breakers (and gauges) up front so the
    // admin surface shows them before the first call.
    for service in [catalog::INFOBLOX_API, catalog::ATCFW_API] {
        pipeline.breaker(service);
        metrics.set_gauge("circuit_breaker_state", &[("service", service)], 0.0);
    }

    let registry = Arc::new(ToolRegistry::new(
        catalog::catalog(),
        pipeline.clone(),
        RegistryConfig {
            default_cache_ttl: Duration::from_secs(settings.cache_ttl_seconds),
            default_deadline: settings.request_timeout(),
        },
    ));
    info!("registered {} tools", registry.len());

    let sessions = SessionManager::new(settings.session_idle(), metrics.clone());
    tokio::spawn(sessions.clone().run_sweeper(SWEEP_INTERVAL));

    let health = HealthEvaluator::new(
        metrics.clone(),
        pipeline.clone(),
        settings.cache_hit_rate_floor,
    );

    let gateway_state = GatewayState {
        registry: registry.clone(),
        sessions: sessions.clone(),
        metrics: metrics.clone(),
        tracer: tracer.clone(),
    };
    let admin_state = AdminState {
        metrics: metrics.clone(),
        health,
        tool_count: registry.len(),
    };

    let governor_conf = GovernorConfigBuilder::default()
        .per_second(100)
        .burst_size(200)
        .finish()
        .ok_or_else(|| "invalid rate limit configuration".to_string())?;

    let rpc_bind = (settings.bind_address.clone(), settings.rpc_port);
    let rpc_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(gateway_state.clone()))
            .wrap(Governor::new(&governor_conf))
            .wrap(Logger::new(r#"%a "%r" %s %b %T"#))
            .configure(rpc::configure_rpc)
            .configure(sse::configure_sse)
    })
    .bind(rpc_bind.clone())
    .map_err(|e| format!("failed to bind RPC listener on {}:{}: {}", rpc_bind.0, rpc_bind.1, e))?
    .run();

    let admin_bind = (settings.bind_address.clone(), settings.admin_port);
    let admin_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(admin_state.clone()))
            .configure(configure_admin)
    })
    .bind(admin_bind.clone())
    .map_err(|e| {
        format!("failed to bind admin listener on {}:{}: {}", admin_bind.0, admin_bind.1, e)
    })?
    .run();

    let rpc_handle = rpc_server.handle();
    let admin_handle = admin_server.handle();
    info!(
        "RPC transport on {}:{}, admin surface on {}:{}",
        settings.bind_address, settings.rpc_port, settings.bind_address, settings.admin_port
    );

    tokio::select! {
        result = rpc_server => {
            match result {
                Ok(()) => info!("RPC listener stopped"),
                Err(e) => error!("RPC listener failed: {}", e),
            }
        }
        result = admin_server => {
            match result {
                Ok(()) => info!("admin listener stopped"),
                Err(e) => error!("admin listener failed: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            events::emit(
                log::Level::Info,
                "shutdown",
                "shutdown",
                &[("grace_seconds", json!(settings.shutdown_grace_seconds))],
            );
            // Stop accepting new sessions, cancel in-flight calls and
            // give them the grace window to unwind before the
            // listeners drop their connections.
            sessions.close_all("shutdown");
            tokio::time::sleep(Duration::from_secs(settings.shutdown_grace_seconds)).await;
            rpc_handle.stop(true).await;
            admin_handle.stop(true).await;
        }
    }

    tracer.flush().await;
    info!("pylon-gateway stopped");
    Ok(())
}
