//! Per-call sync context: cancellation and progress reporting.
//!
//! A context is threaded through `get_or_fetch`, the paginator and the
//! rate-limit fetcher. Cancellation is observed before every page request and
//! during backoff sleeps; progress events go to an optional channel.

use std::future::pending;

use tokio::sync::{mpsc, watch};

use crate::error::{Result, SyncError};

// == Progress ==
/// Intermediate progress of a running sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncProgress {
    /// Another page arrived. `total` is the upstream's record count when known.
    InProgress { fetched: usize, total: Option<u64> },
    /// Upstream answered 429; the fetcher is waiting before the next attempt.
    RateLimited { attempt: u32, retry_in_ms: u64 },
}

// == Cancellation ==
/// Sending half of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signals every token derived from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving half of a cancellation pair. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Creates a linked handle/token pair.
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx: Some(rx) })
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is signalled. Never resolves for
    /// [`CancelToken::never`] or when the handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return pending().await;
            }
        }
    }
}

// == Sync Context ==
/// Cancellation token plus optional progress sink for one sync call.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    cancel: CancelToken,
    progress: Option<mpsc::UnboundedSender<SyncProgress>>,
}

impl SyncContext {
    /// Context that is never cancelled and reports nothing.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    /// Attaches a progress channel, returning its receiving end.
    pub fn with_progress(mut self) -> (Self, mpsc::UnboundedReceiver<SyncProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.progress = Some(tx);
        (self, rx)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with [`SyncError::Cancelled`] once cancellation was signalled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Emits a progress event; a closed channel is ignored.
    pub fn report(&self, event: SyncProgress) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }

    /// Sleeps for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
        }
    }
}
