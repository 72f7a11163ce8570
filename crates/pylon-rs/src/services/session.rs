//! Session table for the RPC transport.
//!
//! A session is born on `initialize`, lives while the client talks,
//! and dies on `close`, client disconnect or idle timeout. Session
//! ids are random UUIDs, unique for the process lifetime. Each
//! session owns a bounded outbound frame queue: when a client stops
//! reading its event stream, handler sends block on the full queue
//! instead of buffering without bound, which throttles exactly the
//! ill-behaved session and nobody else.
//!
//! State machine per session: `READY` from creation (the transport
//! only creates sessions on a valid `initialize`) until `CLOSED`.
//! Closed sessions reject every frame; the sweeper task closes
//! sessions idle past the configured timeout.

use crate::logs::events;
use crate::models::error::GatewayError;
use crate::models::frame::{negotiate_version, Frame};
use crate::services::metrics::MetricsRegistry;
use crate::utils::cancel::{cancel_pair, CancelHandle, CancelToken};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound queue depth per session.
const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready = 0,
    Closed = 1,
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            1 => SessionState::Closed,
            _ => SessionState::Ready,
        }
    }
}

/// One live client session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub protocol_version: &'static str,
    pub created_at: DateTime<Utc>,
    state: AtomicU8,
    last_activity: RwLock<Instant>,
    cancel: CancelHandle,
    outbound_tx: mpsc::Sender<Frame>,
    /// Taken once by the legacy event-stream transport.
    outbound_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
}

impl Session {
    fn new(protocol_version: &'static str) -> Arc<Self> {
        let (cancel, _) = cancel_pair();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            protocol_version,
            created_at: Utc::now(),
            state: AtomicU8::new(SessionState::Ready as u8),
            last_activity: RwLock::new(Instant::now()),
            cancel,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        })
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.state.load(Ordering::Acquire))
    }

    /// Cancellation token observed by every call on this session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.token()
    }

    /// Sender feeding the session-wide outbound queue (legacy
    /// transport). Sends block when the client stops reading.
    pub fn outbound(&self) -> mpsc::Sender<Frame> {
        self.outbound_tx.clone()
    }

    /// Claims the outbound receiver for an event stream. Only one
    /// stream may be attached at a time.
    pub fn take_outbound(&self) -> Option<mpsc::Receiver<Frame>> {
        self.outbound_rx.lock().unwrap().take()
    }

    pub fn touch(&self) {
        *self.last_activity.write().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().unwrap().elapsed()
    }

    fn close(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
        self.cancel.cancel();
    }
}

/// Process-wide session table.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    idle_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration, metrics: Arc<MetricsRegistry>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
            metrics,
        })
    }

    /// Handles `initialize`: creates a session with a negotiated
    /// protocol version.
    pub fn create(&self, requested_version: &str) -> Arc<Session> {
        let version = negotiate_version(requested_version);
        let session = Session::new(version);
        self.sessions
            .write()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        self.update_gauge();
        events::emit(
            log::Level::Info,
            "client_initialized",
            &session.id,
            &[
                ("session", json!(session.id)),
                ("protocol_version", json!(version)),
                ("requested_version", json!(requested_version)),
            ],
        );
        session
    }

    /// Resolves a session for an incoming frame, refreshing its idle
    /// clock. Unknown and closed sessions are both rejected; a
    /// closed session id never becomes valid again.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, GatewayError> {
        let session = self
            .sessions
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::Session {
                message: format!("unknown session '{}'", id),
            })?;
        if session.state() == SessionState::Closed {
            return Err(GatewayError::Session {
                message: format!("session '{}' is closed", id),
            });
        }
        session.touch();
        Ok(session)
    }

    /// Closes one session, cancelling its in-flight calls.
    pub fn close(&self, id: &str, reason: &str) {
        let removed = self.sessions.write().unwrap().remove(id);
        if let Some(session) = removed {
            session.close();
            self.update_gauge();
            events::emit(
                log::Level::Info,
                "session_closed",
                id,
                &[("session", json!(id)), ("reason", json!(reason))],
            );
        }
    }

    /// Closes every session; used at shutdown.
    pub fn close_all(&self, reason: &str) {
        let drained: Vec<Arc<Session>> =
            self.sessions.write().unwrap().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
            events::emit(
                log::Level::Info,
                "session_closed",
                &session.id,
                &[("session", json!(session.id)), ("reason", json!(reason))],
            );
        }
        self.update_gauge();
        if !drained.is_empty() {
            info!("closed {} sessions", drained.len());
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// One sweep pass; returns how many sessions were closed.
    pub fn sweep_idle(&self) -> usize {
        let expired: Vec<String> = self
            .sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.idle_for() > self.idle_timeout)
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            debug!("sweeping idle session {}", id);
            self.close(id, "idle_timeout");
        }
        expired.len()
    }

    /// Long-running sweeper; spawn at bootstrap.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_idle();
        }
    }

    fn update_gauge(&self) {
        self.metrics
            .set_gauge("active_sessions", &[], self.active_count() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(idle: Duration) -> Arc<SessionManager> {
        SessionManager::new(idle, Arc::new(MetricsRegistry::default()))
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let manager = manager(Duration::from_secs(300));
        let a = manager.create("2025-06-18");
        let b = manager.create("2025-06-18");
        assert_ne!(a.id, b.id);
        assert_eq!(manager.active_count(), 2);
    }

    #[tokio::test]
    async fn closed_sessions_reject_frames() {
        let manager = manager(Duration::from_secs(300));
        let session = manager.create("2025-06-18");
        assert!(manager.get(&session.id).is_ok());
        manager.close(&session.id, "client_close");
        let err = manager.get(&session.id).unwrap_err();
        assert_eq!(err.kind(), "session_error");
    }

    #[tokio::test]
    async fn close_cancels_in_flight_calls() {
        let manager = manager(Duration::from_secs(300));
        let session = manager.create("2025-06-18");
        let token = session.cancel_token();
        assert!(!token.is_cancelled());
        manager.close(&session.id, "client_close");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn idle_sessions_are_swept() {
        let manager = manager(Duration::from_millis(10));
        let session = manager.create("2025-06-18");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(manager.sweep_idle(), 1);
        assert!(manager.get(&session.id).is_err());
    }

    #[tokio::test]
    async fn outbound_receiver_is_claimed_once() {
        let manager = manager(Duration::from_secs(300));
        let session = manager.create("2025-06-18");
        assert!(session.take_outbound().is_some());
        assert!(session.take_outbound().is_none());
    }
}
