//! Streamable HTTP transport at `/mcp`.
//!
//! Clients POST one frame per request. Handshake and bookkeeping
//! frames (`initialize`, `list_tools`, `ping`, `close`) are answered
//! with a single JSON frame; `call_tool` is answered with an SSE
//! stream carrying zero or more `progress` frames and exactly one
//! terminal `call_tool_result` or `error` frame.
//!
//! Disconnect handling: the response stream owns a guard that cancels
//! the call's token when the client goes away, and every session's
//! token fans out into its calls, so `session close → call cancel →
//! upstream abort` needs no polling anywhere.

use crate::logs::events;
use crate::models::error::GatewayError;
use crate::models::frame::Frame;
use crate::routes::GatewayState;
use crate::services::registry::InvokeContext;
use crate::services::session::Session;
use crate::services::trace::{SpanBuilder, SpanStatus};
use crate::utils::cancel::{CancelHandle, CancelToken};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::Stream;
use log::Level;
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Depth of the per-call frame queue feeding one SSE response.
const CALL_QUEUE: usize = 32;

/// Registers the RPC transport routes.
pub fn configure_rpc(cfg: &mut web::ServiceConfig) {
    cfg.route("/mcp", web::post().to(mcp_endpoint));
}

async fn mcp_endpoint(
    state: web::Data<GatewayState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let frame: Frame = match serde_json::from_slice(&body) {
        Ok(frame) => frame,
        Err(e) => {
            let error = GatewayError::Session { message: format!("malformed frame: {}", e) };
            return HttpResponse::BadRequest().json(Frame::error(
                "",
                None,
                &Uuid::new_v4().to_string(),
                &error,
            ));
        }
    };

    match frame {
        Frame::Initialize { id, protocol_version } => {
            // A client that already holds a session must not
            // re-initialize on it.
            if req.headers().contains_key("x-session-id") {
                let error = GatewayError::Session {
                    message: "session already initialized".to_string(),
                };
                return HttpResponse::BadRequest().json(Frame::error(
                    &id,
                    None,
                    &Uuid::new_v4().to_string(),
                    &error,
                ));
            }
            let session = state.sessions.create(&protocol_version);
            HttpResponse::Ok().json(Frame::Initialized {
                id,
                protocol_version: session.protocol_version.to_string(),
                session_id: session.id.clone(),
                server_name: "pylon-gateway".to_string(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
            })
        }
        Frame::ListTools { id, session_id } => match state.sessions.get(&session_id) {
            Ok(_) => HttpResponse::Ok().json(Frame::ListToolsResult {
                id,
                session_id,
                tools: state.registry.list_tools(),
            }),
            Err(error) => session_rejection(&id, &session_id, &error),
        },
        Frame::Ping { id, session_id } => match state.sessions.get(&session_id) {
            Ok(_) => HttpResponse::Ok().json(Frame::Pong { id, session_id }),
            Err(error) => session_rejection(&id, &session_id, &error),
        },
        Frame::Close { id, session_id } => {
            state.sessions.close(&session_id, "client_close");
            HttpResponse::Ok().json(Frame::Close { id, session_id })
        }
        Frame::CallTool { id, session_id, name, arguments } => {
            let session = match state.sessions.get(&session_id) {
                Ok(session) => session,
                Err(error) => return session_rejection(&id, &session_id, &error),
            };
            let (tx, rx) = mpsc::channel(CALL_QUEUE);
            let (call_handle, call_token) = session.cancel_token().child();
            spawn_call(
                state.get_ref().clone(),
                session,
                id,
                name,
                arguments,
                tx,
                call_token,
            );
            HttpResponse::Ok()
                .content_type("text/event-stream")
                .insert_header(("cache-control", "no-cache"))
                .streaming(CallStream { rx, _guard: CallGuard { handle: call_handle } })
        }
        // Server-to-client frames arriving inbound are protocol
        // violations.
        other => {
            let error = GatewayError::Session {
                message: "frame type is not valid client-to-server".to_string(),
            };
            HttpResponse::BadRequest().json(Frame::error(
                other.id(),
                other.session_id(),
                &Uuid::new_v4().to_string(),
                &error,
            ))
        }
    }
}

fn session_rejection(id: &str, session_id: &str, error: &GatewayError) -> HttpResponse {
    HttpResponse::BadRequest().json(Frame::error(
        id,
        Some(session_id),
        &Uuid::new_v4().to_string(),
        error,
    ))
}

/// Runs one tool call to completion on its own task, emitting exactly
/// one terminal frame into `sink`. Shared by both transports.
pub(crate) fn spawn_call(
    state: GatewayState,
    session: Arc<Session>,
    call_id: String,
    name: String,
    arguments: Value,
    sink: mpsc::Sender<Frame>,
    cancel: CancelToken,
) {
    tokio::spawn(async move {
        let correlation_id = Uuid::new_v4().to_string();
        let mut span = SpanBuilder::root("call_tool", &correlation_id);
        span.set_attr("tool", name.clone());
        span.set_attr("session", session.id.clone());
        span.set_attr("correlation_id", correlation_id.clone());

        let ctx = InvokeContext {
            call_id: call_id.clone(),
            session_id: session.id.clone(),
            correlation_id: correlation_id.clone(),
            parent_span_id: Some(span.span_id().to_string()),
            cancel,
            progress: Some(sink.clone()),
        };

        let started = Instant::now();
        let outcome = state.registry.invoke(&name, &arguments, ctx).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        state
            .metrics
            .observe("rpc_request_duration_ms", &[("tool", &name)], elapsed_ms);

        let terminal = match outcome {
            Ok(result) => {
                state
                    .metrics
                    .incr("rpc_requests_total", &[("tool", &name), ("status", "ok")]);
                state.metrics.record_outcome(true);
                state.tracer.export(span.finish(SpanStatus::Ok));
                Frame::CallToolResult {
                    id: call_id,
                    session_id: session.id.clone(),
                    result,
                }
            }
            Err(error) => {
                state
                    .metrics
                    .incr("rpc_requests_total", &[("tool", &name), ("status", "error")]);
                state
                    .metrics
                    .incr("rpc_errors_total", &[("tool", &name), ("error_kind", error.kind())]);
                // A cancelled call is not upstream trouble; keep it
                // out of the health error rate.
                if !matches!(error, GatewayError::Cancelled) {
                    state.metrics.record_outcome(false);
                }
                span.set_attr("error_kind", error.kind());
                let status = if matches!(error, GatewayError::Cancelled) {
                    SpanStatus::Cancelled
                } else {
                    SpanStatus::Error
                };
                state.tracer.export(span.finish(status));
                events::emit(
                    Level::Debug,
                    "call_finished",
                    &correlation_id,
                    &[("tool", json!(name)), ("error_kind", json!(error.kind()))],
                );
                Frame::error(&call_id, Some(&session.id), &correlation_id, &error)
            }
        };
        // The client may already be gone; a failed send is fine, the
        // metrics above are the durable record.
        let _ = sink.send(terminal).await;
    });
}

/// Guard cancelling a call when the client stops reading its stream.
struct CallGuard {
    handle: CancelHandle,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// SSE body streaming the call's frames; ends when the call task
/// drops its sender after the terminal frame.
struct CallStream {
    rx: mpsc::Receiver<Frame>,
    _guard: CallGuard,
}

impl Stream for CallStream {
    type Item = Result<web::Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(sse_bytes(&frame)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Encodes one frame as an SSE `data:` event.
pub(crate) fn sse_bytes(frame: &Frame) -> web::Bytes {
    let payload = serde_json::to_string(frame).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("data: {}\n\n", payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_encoding_wraps_frames() {
        let frame = Frame::Pong { id: "1".into(), session_id: "s".into() };
        let bytes = sse_bytes(&frame);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("\n\n"));
        assert!(text.contains("\"type\":\"pong\""));
    }
}
