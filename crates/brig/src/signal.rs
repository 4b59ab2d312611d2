//! Cooperative cancellation and pause.
//!
//! [`RunSignals`] is cloned into every loop of a run. Loops call
//! [`checkpoint`](RunSignals::checkpoint) at the head of each iteration and
//! wrap every suspending call in [`suspend`](RunSignals::suspend), which
//! checks both signals before and after the call and abandons the call as soon
//! as cancellation is requested.

use crate::error::{Result, TaskError};
use std::future::Future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared cancellation token plus a pause gate.
#[derive(Clone, Debug)]
pub struct RunSignals {
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
}

impl Default for RunSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSignals {
    pub fn new() -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            pause_tx,
        }
    }

    /// Build signals around an existing token, e.g. one tied to Ctrl-C.
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::new()
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn pause(&self) {
        self.pause_tx.send_replace(true);
    }

    pub fn resume(&self) {
        self.pause_tx.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    /// Fail if cancelled; wait while paused.
    ///
    /// Cancellation while paused ends the wait immediately.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        let mut rx = self.pause_tx.subscribe();
        while *rx.borrow_and_update() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        if self.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        Ok(())
    }

    /// Run one suspending call between two checkpoints.
    ///
    /// The call is dropped if cancellation fires while it is pending.
    pub async fn suspend<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.checkpoint().await?;
        let out = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
            out = fut => out,
        };
        self.checkpoint().await?;
        Ok(out)
    }
}
