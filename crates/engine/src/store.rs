//! Run persistence contract and the in-memory store.
//!
//! The store owns the authoritative copy of every [`RunState`]. Writers
//! pre-increment `version` and `save` verifies strictly-greater-than the
//! stored value, so a stale writer always loses with
//! [`CoreError::RunVersionConflict`].

use std::collections::HashMap;

use parking_lot::RwLock;

use rg_domain::cancel::CancelToken;
use rg_domain::error::{CoreError, Result};
use rg_domain::run::RunState;

/// Persistence contract for run state.
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a brand-new run. Fails with `CommandConflict` if the id is
    /// already taken.
    async fn create(&self, cancel: &CancelToken, state: &RunState) -> Result<()>;

    /// Deep-cloned snapshot, or `RunNotFound`.
    async fn load(&self, cancel: &CancelToken, run_id: &str) -> Result<RunState>;

    /// Compare-and-swap by version: the incoming version must be strictly
    /// greater than the stored one.
    async fn save(&self, cancel: &CancelToken, state: &RunState) -> Result<()>;
}

/// The in-memory store: a `RwLock<HashMap>` keyed by run id.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<String, RunState>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryRunStore {
    async fn create(&self, cancel: &CancelToken, state: &RunState) -> Result<()> {
        cancel.check()?;
        let mut runs = self.runs.write();
        if runs.contains_key(&state.id) {
            return Err(CoreError::CommandConflict(state.id.clone()));
        }
        runs.insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, cancel: &CancelToken, run_id: &str) -> Result<RunState> {
        cancel.check()?;
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| CoreError::RunNotFound(run_id.to_owned()))
    }

    async fn save(&self, cancel: &CancelToken, state: &RunState) -> Result<()> {
        cancel.check()?;
        let mut runs = self.runs.write();
        let stored = runs
            .get(&state.id)
            .ok_or_else(|| CoreError::RunNotFound(state.id.clone()))?;
        if state.version <= stored.version {
            return Err(CoreError::RunVersionConflict {
                run_id: state.id.clone(),
                attempted: state.version,
                stored: stored.version,
            });
        }
        runs.insert(state.id.clone(), state.clone());
        Ok(())
    }
}
