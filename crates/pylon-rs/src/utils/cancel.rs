//! Cooperative cancellation tokens.
//!
//! Cancellation propagates session → call → upstream request: the
//! session owns a [`CancelHandle`], each call derives a child token
//! from the session's token, and the pipeline races its work against
//! [`CancelToken::cancelled`]. Dropping the in-flight future at the
//! await point is what guarantees a cancelled call never mutates the
//! cache or breaker counters.
//!
//! A token may observe several levels (session and call); it fires
//! when any level cancels, or when a level's handle is dropped; an
//! orphaned call has nobody left to report to either way.

use futures_util::future::select_all;
use tokio::sync::watch;

/// Owning side of one cancellation level.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Token observing only this level.
    pub fn token(&self) -> CancelToken {
        CancelToken { receivers: vec![self.sender.subscribe()] }
    }
}

/// Observer side; cheap to clone, shared across await points.
#[derive(Debug, Clone)]
pub struct CancelToken {
    receivers: Vec<watch::Receiver<bool>>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.receivers.iter().any(|r| *r.borrow())
    }

    /// Resolves when any observed level fires or its handle is
    /// dropped without firing.
    pub async fn cancelled(&self) {
        let mut receivers = self.receivers.clone();
        loop {
            if receivers.iter().any(|r| *r.borrow()) {
                return;
            }
            let waiters: Vec<_> = receivers
                .iter_mut()
                .map(|r| Box::pin(r.changed()))
                .collect();
            let (result, _, _) = select_all(waiters).await;
            if result.is_err() {
                return;
            }
        }
    }

    /// Derives a child level: the returned token fires when either
    /// this token or the new handle fires.
    pub fn child(&self) -> (CancelHandle, CancelToken) {
        let (sender, receiver) = watch::channel(false);
        let mut receivers = self.receivers.clone();
        receivers.push(receiver);
        (CancelHandle { sender }, CancelToken { receivers })
    }
}

/// Creates a fresh root cancellation pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelToken { receivers: vec![receiver] })
}
