//! Cooperative cancellation shared by a file-level call and all its sub-calls.
//!
//! A [`CancelToken`] is cheap to clone; every clone observes the same flag.
//! Backends check [`CancelToken::is_cancelled`] before dispatching a unit of
//! work and race in-flight network futures against
//! [`CancelToken::cancelled`] with `tokio::select!`, so signalling the token
//! drops (and thereby aborts) any request still on the wire.

use std::sync::Arc;
use tokio::sync::watch;

/// A one-way cancellation flag.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot observe a
        // closed channel here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Return `Err(Cancelled)` if the token has been signalled.
    pub fn check(&self) -> Result<(), crate::error::IngestError> {
        if self.is_cancelled() {
            Err(crate::error::IngestError::Cancelled)
        } else {
            Ok(())
        }
    }
}
