//! Event fan-out and the cursor-resumable stream broker.
//!
//! Events flow through one [`FanoutSink`]: every backend sees every
//! accepted event, a failing backend never reorders or starves its
//! siblings, and failures are joined into a single error the caller may
//! log. The [`StreamBroker`] backend assigns per-run monotonic frame ids
//! and retains a bounded history that readers page through by cursor.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use rg_domain::cancel::CancelToken;
use rg_domain::error::{CoreError, Result};
use rg_domain::event::{Event, StreamFrame};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sink trait + backends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accepts validated events.
pub trait EventSink: Send + Sync {
    fn publish(&self, cancel: &CancelToken, event: &Event) -> Result<()>;
}

/// Logs every event as a structured tracing record.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, cancel: &CancelToken, event: &Event) -> Result<()> {
        cancel.check()?;
        event.validate()?;
        tracing::debug!(
            run_id = %event.run_id,
            step = event.step,
            event_type = ?event.event_type,
            "run event"
        );
        Ok(())
    }
}

/// Broadcast to every backend; join failures without aborting siblings.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, cancel: &CancelToken, event: &Event) -> Result<()> {
        cancel.check()?;
        event.validate()?;
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.publish(cancel, event) {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Other(format!(
                "{} sink failure(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RunHistory {
    /// Id handed to the next accepted event; the first frame gets 1.
    next_id: i64,
    frames: VecDeque<StreamFrame>,
}

impl RunHistory {
    fn new() -> Self {
        Self {
            next_id: 1,
            frames: VecDeque::new(),
        }
    }

    fn latest_id(&self) -> i64 {
        self.next_id - 1
    }

    fn oldest_retained_id(&self) -> i64 {
        self.latest_id() - self.frames.len() as i64 + 1
    }
}

/// Bounded per-run frame history with cursor reads.
///
/// This is a buffered history, not a queue: publishes never wait on
/// readers, and cursors older than the retained window surface
/// `CursorExpired` so the client restarts from zero.
pub struct StreamBroker {
    inner: RwLock<HashMap<String, RunHistory>>,
    history_limit: usize,
}

impl StreamBroker {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// All retained frames with `id > cursor`, ascending.
    pub fn events_after(&self, run_id: &str, cursor: i64) -> Result<Vec<StreamFrame>> {
        if cursor < 0 {
            return Err(CoreError::CursorInvalid(cursor));
        }
        let inner = self.inner.read();
        let history = match inner.get(run_id) {
            Some(h) => h,
            None if cursor == 0 => return Ok(Vec::new()),
            None => return Err(CoreError::CursorInvalid(cursor)),
        };
        if cursor > history.latest_id() {
            return Err(CoreError::CursorInvalid(cursor));
        }
        if cursor < history.oldest_retained_id() - 1 {
            return Err(CoreError::CursorExpired(cursor));
        }
        Ok(history
            .frames
            .iter()
            .filter(|f| f.id > cursor)
            .cloned()
            .collect())
    }

    /// Highest id assigned for a run so far (0 when none).
    pub fn latest_id(&self, run_id: &str) -> i64 {
        self.inner
            .read()
            .get(run_id)
            .map(RunHistory::latest_id)
            .unwrap_or(0)
    }
}

impl EventSink for StreamBroker {
    fn publish(&self, cancel: &CancelToken, event: &Event) -> Result<()> {
        cancel.check()?;
        event.validate()?;
        let mut inner = self.inner.write();
        let history = inner
            .entry(event.run_id.clone())
            .or_insert_with(RunHistory::new);
        let id = history.next_id;
        history.next_id += 1;
        history.frames.push_back(StreamFrame {
            id,
            event: event.clone(),
        });
        while history.frames.len() > self.history_limit {
            history.frames.pop_front();
        }
        Ok(())
    }
}
