//! Session cancellation
//!
//! One [`CancelHandle`] per session, any number of [`CancelSignal`] clones.
//! Wrapping a daemon call in [`CancelSignal::run`] drops the call's future
//! on cancellation, which kills the underlying engine process.

use crate::error::{ImgcacheError, ImgcacheResult};
use std::future::Future;
use tokio::sync::watch;

/// Triggers cancellation of every linked [`CancelSignal`]
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation of a session
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (handle, signal) = cancel_pair();
        // Dropping the handle leaves the value at false forever
        drop(handle);
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` unless cancelled first
    pub async fn run<F, T>(&self, fut: F) -> ImgcacheResult<T>
    where
        F: Future<Output = ImgcacheResult<T>>,
    {
        if self.is_cancelled() {
            return Err(ImgcacheError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ImgcacheError::Cancelled),
            result = fut => result,
        }
    }
}
