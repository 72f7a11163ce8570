//! Deprecated event-stream transport at `/sse`.
//!
//! Same protocol state machine as `/mcp`, different framing: the
//! client initializes with a POST to `/sse/messages`, attaches one
//! long-lived event stream via `GET /sse?session_id=…`, then POSTs
//! further frames to `/sse/messages`. Results and progress arrive on
//! the attached stream, fed by the session's bounded outbound queue,
//! which is where backpressure for slow readers comes from.
//!
//! Clients are expected to try `/mcp` first and fall back here only
//! when it fails.

use crate::models::error::GatewayError;
use crate::models::frame::Frame;
use crate::routes::rpc::{spawn_call, sse_bytes};
use crate::routes::GatewayState;
use actix_web::error::ResponseError;
use actix_web::{web, HttpResponse};
use futures_util::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Registers the legacy transport routes.
pub fn configure_sse(cfg: &mut web::ServiceConfig) {
    cfg.route("/sse", web::get().to(sse_stream))
        .route("/sse/messages", web::post().to(sse_message));
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    session_id: String,
}

/// Attaches the long-lived event stream for a session.
async fn sse_stream(
    state: web::Data<GatewayState>,
    query: web::Query<StreamQuery>,
) -> HttpResponse {
    let session = match state.sessions.get(&query.session_id) {
        Ok(session) => session,
        Err(error) => return error.error_response(),
    };
    let Some(rx) = session.take_outbound() else {
        let error = GatewayError::Session {
            message: "an event stream is already attached to this session".to_string(),
        };
        return error.error_response();
    };
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("cache-control", "no-cache"))
        .streaming(SessionStream { rx })
}

/// Accepts one inbound frame; responses are delivered on the attached
/// stream, so most frames are acknowledged with `202 Accepted`.
async fn sse_message(state: web::Data<GatewayState>, body: web::Bytes) -> HttpResponse {
    let frame: Frame = match serde_json::from_slice(&body) {
        Ok(frame) => frame,
        Err(e) => {
            let error = GatewayError::Session { message: format!("malformed frame: {}", e) };
            return error.error_response();
        }
    };

    match frame {
        // The handshake answers inline: the client has no stream yet.
        Frame::Initialize { id, protocol_version } => {
            let session = state.sessions.create(&protocol_version);
            HttpResponse::Ok().json(Frame::Initialized {
                id,
                protocol_version: session.protocol_version.to_string(),
                session_id: session.id.clone(),
                server_name: "pylon-gateway".to_string(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
            })
        }
        Frame::ListTools { id, session_id } => {
            let session = match state.sessions.get(&session_id) {
                Ok(session) => session,
                Err(error) => return error.error_response(),
            };
            let reply = Frame::ListToolsResult {
                id,
                session_id,
                tools: state.registry.list_tools(),
            };
            let _ = session.outbound().send(reply).await;
            HttpResponse::Accepted().finish()
        }
        Frame::Ping { id, session_id } => {
            let session = match state.sessions.get(&session_id) {
                Ok(session) => session,
                Err(error) => return error.error_response(),
            };
            let _ = session.outbound().send(Frame::Pong { id, session_id }).await;
            HttpResponse::Accepted().finish()
        }
        Frame::Close { id: _, session_id } => {
            state.sessions.close(&session_id, "client_close");
            HttpResponse::Accepted().finish()
        }
        Frame::CallTool { id, session_id, name, arguments } => {
            let session = match state.sessions.get(&session_id) {
                Ok(session) => session,
                Err(error) => return error.error_response(),
            };
            // No per-call disconnect detection on the legacy
            // transport; session close is the cancellation signal.
            spawn_call(
                state.get_ref().clone(),
                session.clone(),
                id,
                name,
                arguments,
                session.outbound(),
                session.cancel_token(),
            );
            HttpResponse::Accepted().finish()
        }
        _ => GatewayError::Session {
            message: "frame type is not valid client-to-server".to_string(),
        }
        .error_response()
    }
}

/// Event stream over the session's outbound queue; ends when the
/// session closes and the last sender drops.
struct SessionStream {
    rx: mpsc::Receiver<Frame>,
}

impl Stream for SessionStream {
    type Item = Result<web::Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(sse_bytes(&frame)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
