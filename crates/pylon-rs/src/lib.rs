//! # pylon-rs
//!
//! Runtime library for the Pylon tool gateway: a reliability and
//! observability shell that exposes network-management operations
//! (IPAM, DNS, DHCP, VPN provisioning, threat defense) to AI-agent
//! clients over a streamable RPC transport, backed by the Infoblox
//! SaaS REST APIs.
//!
//! # Architecture
//!
//! ```text
//! RPC client ──> routes::rpc (sessions, frames)
//!                     │
//!                services::registry (schema validation, dispatch)
//!                     │
//!                services::pipeline (deadline → breaker → cache → retry)
//!                     │
//!                services::upstream (authenticated HTTPS REST)
//! ```
//!
//! Observability (metrics, spans, structured logs, health) hangs off
//! the pipeline and the transport; the admin listener in
//! [`routes::admin`] only reads from it.
//!
//! # Module Organization
//!
//! - [`config`] - Environment-driven settings and validation
//! - [`logs`] - Logger setup and structured event emission
//! - [`models`] - Error taxonomy, RPC frames, tool descriptors
//! - [`services`] - Upstream client, resilience pipeline, registry,
//!   sessions, metrics, tracing, health
//! - [`routes`] - The `/mcp` and `/sse` transports plus the admin
//!   surface
//! - [`utils`] - Canonical argument hashing

pub mod config;
pub mod logs;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
