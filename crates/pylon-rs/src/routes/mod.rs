//! HTTP surfaces: the RPC transport and the admin listener.
//!
//! # Module Organization
//!
//! - [`rpc`] - Streamable HTTP transport at `/mcp`
//! - [`sse`] - Deprecated event-stream transport at `/sse`
//! - [`admin`] - `/`, `/metrics`, `/metrics/json`, `/health`

pub mod admin;
pub mod rpc;
pub mod sse;

use crate::services::metrics::MetricsRegistry;
use crate::services::registry::ToolRegistry;
use crate::services::session::SessionManager;
use crate::services::trace::Tracer;
use std::sync::Arc;

/// Shared state injected into the RPC transport handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<ToolRegistry>,
    pub sessions: Arc<SessionManager>,
    pub metrics: Arc<MetricsRegistry>,
    pub tracer: Arc<Tracer>,
}
