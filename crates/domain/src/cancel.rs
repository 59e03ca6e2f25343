//! Cooperative cancellation token.
//!
//! Every suspension point in the core (planner calls, tool execution,
//! store I/O, stream reads) takes a `&CancelToken` as its first parameter
//! and fails fast with [`CoreError::Cancelled`] once the token fires.
//!
//! The token can be polled (`is_cancelled`) inside loops and awaited
//! (`cancelled`) inside `tokio::select!` arms.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

use crate::error::{CoreError, Result};

/// A cancellation token checked and awaited by the runtime.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    /// Human-readable reason, set once at cancel time.
    reason: OnceLock<String>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                reason: OnceLock::new(),
            }),
        }
    }

    /// Signal cancellation with a reason. Idempotent; the first reason wins.
    pub fn cancel(&self, reason: &str) {
        let _ = self.inner.reason.set(reason.to_owned());
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        // Re-check after registering so a signal between the fast path and
        // `notified().await` is never lost.
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                break;
            }
            notified.await;
        }
    }

    /// The error this token produces once cancelled.
    pub fn err(&self) -> CoreError {
        CoreError::Cancelled(
            self.inner
                .reason
                .get()
                .map(String::as_str)
                .unwrap_or("operation cancelled")
                .to_owned(),
        )
    }

    /// Fail fast when already cancelled; used at the top of every
    /// suspension point.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(self.err())
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
