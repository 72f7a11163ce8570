//! RPC frames exchanged on the streamable transport.
//!
//! Every message on `/mcp` and `/sse` is one JSON object tagged by
//! `type`, carrying an opaque correlation `id` and, after the
//! handshake, the session id. The enum below is the single source of
//! truth for the wire format; encoding then decoding any frame yields
//! the original value.

use crate::models::error::GatewayError;
use crate::models::tool::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol versions this gateway can speak, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26"];

/// Negotiates the protocol version for a session.
///
/// The client's requested version wins when the gateway supports it;
/// anything else falls back to the newest supported version.
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

/// A single frame on the RPC wire.
///
/// Request frames (`initialize`, `list_tools`, `call_tool`, `ping`,
/// `close`) flow client to gateway; the rest flow gateway to client.
/// A `call_tool` produces zero or more `progress` frames followed by
/// exactly one terminal `call_tool_result` or `error` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Initialize {
        id: String,
        protocol_version: String,
    },
    Initialized {
        id: String,
        protocol_version: String,
        session_id: String,
        server_name: String,
        server_version: String,
    },
    ListTools {
        id: String,
        session_id: String,
    },
    ListToolsResult {
        id: String,
        session_id: String,
        tools: Vec<ToolDescriptor>,
    },
    CallTool {
        id: String,
        session_id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    CallToolResult {
        id: String,
        session_id: String,
        result: Value,
    },
    Progress {
        id: String,
        session_id: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
    },
    Ping {
        id: String,
        session_id: String,
    },
    Pong {
        id: String,
        session_id: String,
    },
    Error {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
        correlation_id: String,
    },
    Close {
        id: String,
        session_id: String,
    },
}

impl Frame {
    /// Correlation id carried by the frame.
    pub fn id(&self) -> &str {
        match self {
            Frame::Initialize { id, .. }
            | Frame::Initialized { id, .. }
            | Frame::ListTools { id, .. }
            | Frame::ListToolsResult { id, .. }
            | Frame::CallTool { id, .. }
            | Frame::CallToolResult { id, .. }
            | Frame::Progress { id, .. }
            | Frame::Ping { id, .. }
            | Frame::Pong { id, .. }
            | Frame::Error { id, .. }
            | Frame::Close { id, .. } => id,
        }
    }

    /// Session id the frame belongs to, when it carries one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Frame::Initialize { .. } => None,
            Frame::Error { session_id, .. } => session_id.as_deref(),
            Frame::Initialized { session_id, .. }
            | Frame::ListTools { session_id, .. }
            | Frame::ListToolsResult { session_id, .. }
            | Frame::CallTool { session_id, .. }
            | Frame::CallToolResult { session_id, .. }
            | Frame::Progress { session_id, .. }
            | Frame::Ping { session_id, .. }
            | Frame::Pong { session_id, .. }
            | Frame::Close { session_id, .. } => Some(session_id),
        }
    }

    /// Builds the terminal error frame for a failed call.
    ///
    /// Internal detail (stack traces, upstream bodies) stays out of
    /// the wire message; the structured log carries the full context.
    pub fn error(
        id: &str,
        session_id: Option<&str>,
        correlation_id: &str,
        err: &GatewayError,
    ) -> Frame {
        Frame::Error {
            id: id.to_string(),
            session_id: session_id.map(str::to_string),
            kind: err.kind().to_string(),
            message: err.to_string(),
            retry_after: err.retry_after(),
            correlation_id: correlation_id.to_string(),
        }
    }
}
