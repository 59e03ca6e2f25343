//! In-flight engine token registry.
//!
//! Each engine invocation registers a token here so a `cancel` command
//! can interrupt it mid-flight. The registry also remembers *why* a token
//! fired: an explicit cancel command leads to `Cancelled`, while ambient
//! cancellation (client disconnect, shutdown) records `Failed`.

use std::collections::HashMap;

use parking_lot::Mutex;

use rg_domain::cancel::CancelToken;

struct Entry {
    token: CancelToken,
    explicit: bool,
}

#[derive(Default)]
pub struct CancelMap {
    inner: Mutex<HashMap<String, Entry>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a run's engine invocation.
    /// Replaces any stale entry for the same run.
    pub fn register(&self, run_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.inner.lock().insert(
            run_id.to_owned(),
            Entry {
                token: token.clone(),
                explicit: false,
            },
        );
        token
    }

    /// Signal the in-flight token for a run (explicit cancel command).
    ///
    /// Returns `true` only for the call that performed the explicit
    /// transition: the first cancel to hit a live invocation. Later
    /// signals (and signals with nothing in flight) get `false`, so
    /// concurrent cancels cannot all claim the interruption.
    pub fn signal(&self, run_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(run_id) {
            Some(entry) => {
                let first = !entry.explicit;
                entry.explicit = true;
                entry.token.cancel("run cancelled by client");
                first
            }
            None => false,
        }
    }

    /// Remove a run's entry, reporting whether an explicit cancel hit it.
    pub fn finish(&self, run_id: &str) -> bool {
        self.inner
            .lock()
            .remove(run_id)
            .map(|entry| entry.explicit)
            .unwrap_or(false)
    }

    /// Is an engine invocation currently registered for this run?
    pub fn is_running(&self, run_id: &str) -> bool {
        self.inner.lock().contains_key(run_id)
    }
}
