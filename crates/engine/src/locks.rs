//! Per-run concurrency control.
//!
//! Exactly one command executes per run id at a time. Each run id maps to
//! a `Semaphore(1)`; holding the permit *is* holding the run lock, and it
//! releases on drop. Event readers never touch these locks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use rg_domain::cancel::CancelToken;
use rg_domain::error::Result;

pub struct RunLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for RunLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the command lock for a run, respecting the caller's token.
    pub async fn acquire(
        &self,
        cancel: &CancelToken,
        run_id: &str,
    ) -> Result<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(run_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        tokio::select! {
            permit = sem.acquire_owned() => {
                // The semaphore is never closed.
                permit.map_err(|_| cancel.err())
            }
            _ = cancel.cancelled() => Err(cancel.err()),
        }
    }

    /// Number of tracked runs (for monitoring).
    pub fn run_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop entries whose lock is not currently held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}
