//! Run events and stream frames.
//!
//! Events are produced by the engine and the runner, validated once at the
//! sink boundary, and fanned out to every backend. The stream broker wraps
//! each accepted event in a [`StreamFrame`] with a per-run monotonic id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::message::{Message, ToolResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Start,
    Continue,
    FollowUp,
    Steer,
    Cancel,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Continue => "continue",
            Self::FollowUp => "follow_up",
            Self::Steer => "steer",
            Self::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunCheckpoint,
    AssistantMessage,
    #[serde(rename = "tool_result")]
    ToolResultEvent,
    RunSuspended,
    RunCompleted,
    RunFailed,
    RunCancelled,
    CommandApplied,
}

/// One observable fact about a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub run_id: String,
    pub step: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_kind: Option<CommandKind>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(run_id: impl Into<String>, step: u64, event_type: EventType) -> Self {
        Self {
            run_id: run_id.into(),
            step,
            event_type,
            description: None,
            message: None,
            tool_result: None,
            command_kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_tool_result(mut self, result: ToolResult) -> Self {
        self.tool_result = Some(result);
        self
    }

    pub fn with_command_kind(mut self, kind: CommandKind) -> Self {
        self.command_kind = Some(kind);
        self
    }

    /// Validation applied once at the sink boundary.
    pub fn validate(&self) -> Result<()> {
        if self.run_id.is_empty() {
            return Err(CoreError::EventInvalid("empty run_id".into()));
        }
        match self.event_type {
            EventType::CommandApplied => {
                if self.command_kind.is_none() {
                    return Err(CoreError::EventInvalid(
                        "command_applied event without command_kind".into(),
                    ));
                }
            }
            EventType::ToolResultEvent => match &self.tool_result {
                None => {
                    return Err(CoreError::EventInvalid(
                        "tool_result event without payload".into(),
                    ))
                }
                Some(tr) if tr.call_id.is_empty() || tr.name.is_empty() => {
                    return Err(CoreError::EventInvalid(
                        "tool_result payload with empty call_id or name".into(),
                    ))
                }
                Some(_) => {}
            },
            _ => {}
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream frame
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A broker-assigned `{id, event}` pair; ids are per-run, start at 1 and
/// increase strictly by 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub id: i64,
    pub event: Event,
}
