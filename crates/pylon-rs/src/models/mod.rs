//! Data models and domain types for the pylon gateway.
//!
//! This module contains the core data structures used throughout the
//! gateway: the outward error taxonomy, the RPC frame types spoken on
//! the streamable transport, and the tool descriptors that drive the
//! registry.
//!
//! # Module Organization
//!
//! - [`error`] - Gateway error kinds with wire and HTTP mappings
//! - [`frame`] - RPC frames exchanged on `/mcp` and `/sse`
//! - [`tool`] - Tool descriptors, input schemas and validation

pub mod error;
pub mod frame;
pub mod tool;
