//! Run lifecycle primitives: status machine, pending requirements,
//! resolutions, the replay token, and the persisted run state.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::message::Transcript;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a client-supplied run id: non-empty, `[A-Za-z0-9_-]` only.
pub fn validate_run_id(id: &str) -> Result<()> {
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::InvalidRunId(id.to_owned()));
    }
    Ok(())
}

/// Process-local generator for monotonic `run-NNNNNN` ids.
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    next: AtomicU64,
}

impl RunIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("run-{n:06}")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    MaxStepsExceeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The legal transition DAG.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match self {
            Pending => matches!(next, Running | Cancelled),
            Running => matches!(
                next,
                Running | Suspended | Completed | MaxStepsExceeded | Failed | Cancelled
            ),
            Suspended => matches!(next, Running | Cancelled),
            MaxStepsExceeded => matches!(next, Running | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::MaxStepsExceeded => "max_steps_exceeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requirements and resolutions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    Approval,
    UserInput,
    ExternalExecution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementOrigin {
    Model,
    Tool,
}

/// A gate blocking further progress, raised by the planner (model origin)
/// or by a tool executor (tool origin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequirement {
    pub id: String,
    pub kind: RequirementKind,
    pub origin: RequirementOrigin,
    /// Non-empty only for tool-origin requirements.
    #[serde(default)]
    pub tool_call_id: String,
    /// Non-empty only for tool-origin requirements.
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub prompt: String,
}

impl PendingRequirement {
    pub fn model(kind: RequirementKind, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            origin: RequirementOrigin::Model,
            tool_call_id: String::new(),
            fingerprint: String::new(),
            prompt: prompt.into(),
        }
    }

    pub fn tool_approval(
        tool_call_id: impl Into<String>,
        fingerprint: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: RequirementKind::Approval,
            origin: RequirementOrigin::Tool,
            tool_call_id: tool_call_id.into(),
            fingerprint: fingerprint.into(),
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Approved,
    Rejected,
    Provided,
    Completed,
}

/// Client-supplied answer to a pending requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub requirement_id: String,
    pub kind: RequirementKind,
    pub outcome: ResolutionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Resolution {
    /// Check this resolution against the requirement it claims to answer.
    pub fn matches(&self, requirement: &PendingRequirement) -> Result<()> {
        if self.requirement_id != requirement.id {
            return Err(CoreError::ResolutionInvalid(format!(
                "requirement id {:?} does not match pending {:?}",
                self.requirement_id, requirement.id
            )));
        }
        if self.kind != requirement.kind {
            return Err(CoreError::ResolutionInvalid(format!(
                "kind {:?} does not match pending {:?}",
                self.kind, requirement.kind
            )));
        }
        Ok(())
    }

    /// The transcript marker appended for non-replay outcomes.
    pub fn marker(&self) -> String {
        format!(
            "[resolution] requirement_id={} kind={} outcome={}",
            self.requirement_id,
            serde_plain(&self.kind),
            serde_plain(&self.outcome),
        )
    }
}

fn serde_plain<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

/// Single-use token installed by an approved tool-origin resolution.
///
/// Grants exactly one policy bypass to the tool call whose id *and*
/// recomputed fingerprint both match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayToken {
    pub tool_call_id: String,
    pub fingerprint: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The authoritative record of one run, persisted through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: String,
    pub status: RunStatus,
    /// Increments once per applied command.
    pub step: u64,
    /// Optimistic-concurrency token; increments on every persisted mutation.
    pub version: u64,
    pub messages: Transcript,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_requirement: Option<PendingRequirement>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_command_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_replay: Option<ReplayToken>,
}

impl RunState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: RunStatus::Pending,
            step: 0,
            version: 0,
            messages: Transcript::new(),
            pending_requirement: None,
            output: String::new(),
            error: String::new(),
            last_command_id: None,
            approved_replay: None,
        }
    }

    /// Apply a status transition, enforcing the DAG.
    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::RunStateInvalid(format!(
                "{} -> {} is not a legal transition for run {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        Ok(())
    }
}
