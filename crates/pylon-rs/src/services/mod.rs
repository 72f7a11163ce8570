//! Core gateway services.
//!
//! # Module Organization
//!
//! - [`upstream`] - Authenticated HTTP client for the SaaS backend
//! - [`circuit_breaker`] - Per-service breaker state machines
//! - [`cache`] - TTL + LRU response cache
//! - [`pipeline`] - Deadline → breaker → cache → retry composition
//! - [`registry`] / [`catalog`] - Tool registry and the built-in
//!   tool table
//! - [`session`] - RPC session table and idle sweeping
//! - [`metrics`] - Counter/gauge/histogram registry
//! - [`trace`] - Span recording and batched export
//! - [`health`] - Derived health evaluation

pub mod cache;
pub mod catalog;
pub mod circuit_breaker;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod trace;
pub mod upstream;
