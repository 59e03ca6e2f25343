//! Conversation model: messages, tool calls, tool results, and the
//! transcript.
//!
//! The transcript is the durable record a run carries between commands.
//! It keeps a secondary index `tool_call_id → message index` so a tool
//! observation can be replaced in place in O(1): when a call is first
//! blocked (suspended) and later approved, the stale observation is
//! overwritten by the real execution result, never appended next to it.
//! Planner adapters only ever see the latest observation per call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles and tool payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: serde_json::Map::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: serde_json::Value) -> Self {
        self.arguments.insert(key.to_owned(), value);
        self
    }

    /// String argument accessor (most built-in tools take string args).
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// Why a tool observation records a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Suspended,
    ExecutionError,
    Other,
}

/// The outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
            failure_reason: None,
        }
    }

    pub fn suspended(call_id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: prompt.into(),
            is_error: false,
            failure_reason: Some(FailureReason::Suspended),
        }
    }

    pub fn execution_error(call_id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: message.into(),
            is_error: true,
            failure_reason: Some(FailureReason::ExecutionError),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.failure_reason == Some(FailureReason::Suspended)
    }
}

/// Tool definition exposed to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Present on assistant messages that request tool invocations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Present on tool messages: the call this observation answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    pub fn assistant_with_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, text)
        }
    }

    pub fn tool_observation(result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.content.clone(),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.call_id.clone()),
            tool_name: Some(result.name.clone()),
            is_error: result.is_error,
            failure_reason: result.failure_reason,
        }
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            is_error: false,
            failure_reason: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ordered message sequence plus the observation index.
///
/// Serializes as a plain message array; the indexes are rebuilt on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Message>", into = "Vec<Message>")]
pub struct Transcript {
    messages: Vec<Message>,
    /// tool_call_id → index of the assistant message that issued it.
    calls: HashMap<String, usize>,
    /// tool_call_id → index of the (single) tool observation for it.
    observations: HashMap<String, usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a system or user message.
    pub fn push(&mut self, message: Message) {
        debug_assert!(matches!(message.role, Role::System | Role::User));
        self.messages.push(message);
    }

    /// Append an assistant message, registering its tool calls.
    ///
    /// Call ids must be non-empty and unique across the transcript.
    pub fn push_assistant(&mut self, message: Message) -> Result<()> {
        let idx = self.messages.len();
        let mut seen = Vec::with_capacity(message.tool_calls.len());
        for call in &message.tool_calls {
            if call.id.is_empty() {
                return Err(CoreError::RunStateInvalid(
                    "assistant tool call with empty id".into(),
                ));
            }
            if seen.contains(&call.id.as_str()) || self.calls.contains_key(&call.id) {
                return Err(CoreError::RunStateInvalid(format!(
                    "duplicate tool call id {:?}",
                    call.id
                )));
            }
            seen.push(call.id.as_str());
        }
        for call in &message.tool_calls {
            self.calls.insert(call.id.clone(), idx);
        }
        self.messages.push(message);
        Ok(())
    }

    /// Does the transcript contain an assistant call with this id?
    pub fn has_call(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    /// The registered call for an id, if any.
    pub fn call(&self, call_id: &str) -> Option<&ToolCall> {
        let idx = *self.calls.get(call_id)?;
        self.messages[idx].tool_calls.iter().find(|c| c.id == call_id)
    }

    /// The current observation for a call id, if one has been recorded.
    pub fn observation(&self, call_id: &str) -> Option<&Message> {
        self.observations.get(call_id).map(|&i| &self.messages[i])
    }

    /// Record a tool observation.
    ///
    /// The first observation for a call id is appended; a second one
    /// *replaces* the first in place (the approved-replay path). Returns
    /// `true` when an existing observation was replaced.
    pub fn record_observation(&mut self, result: &ToolResult) -> Result<bool> {
        if !self.calls.contains_key(&result.call_id) {
            return Err(CoreError::RunStateInvalid(format!(
                "tool observation for unknown call id {:?}",
                result.call_id
            )));
        }
        let message = Message::tool_observation(result);
        match self.observations.get(&result.call_id) {
            Some(&idx) => {
                self.messages[idx] = message;
                Ok(true)
            }
            None => {
                self.observations
                    .insert(result.call_id.clone(), self.messages.len());
                self.messages.push(message);
                Ok(false)
            }
        }
    }

    /// The planner-bound view: every tool message must answer a registered
    /// call, and only the latest observation per call id survives.
    pub fn normalized(&self) -> Result<Vec<Message>> {
        // Last tool message wins per call id (stored transcripts from older
        // versions may carry stale duplicates).
        let mut latest: HashMap<&str, usize> = HashMap::new();
        for (idx, msg) in self.messages.iter().enumerate() {
            if msg.role != Role::Tool {
                continue;
            }
            let call_id = msg.tool_call_id.as_deref().unwrap_or("");
            if call_id.is_empty() || !self.calls.contains_key(call_id) {
                return Err(CoreError::RunStateInvalid(format!(
                    "tool message without matching assistant call (call_id {call_id:?})"
                )));
            }
            latest.insert(call_id, idx);
        }

        Ok(self
            .messages
            .iter()
            .enumerate()
            .filter(|(idx, msg)| {
                msg.role != Role::Tool
                    || msg
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| latest.get(id))
                        .is_some_and(|&keep| keep == *idx)
            })
            .map(|(_, msg)| msg.clone())
            .collect())
    }

    fn rebuild_indexes(&mut self) {
        self.calls.clear();
        self.observations.clear();
        for (idx, msg) in self.messages.iter().enumerate() {
            match msg.role {
                Role::Assistant => {
                    for call in &msg.tool_calls {
                        self.calls.insert(call.id.clone(), idx);
                    }
                }
                Role::Tool => {
                    if let Some(id) = &msg.tool_call_id {
                        self.observations.insert(id.clone(), idx);
                    }
                }
                _ => {}
            }
        }
    }
}

impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        let mut t = Self {
            messages,
            calls: HashMap::new(),
            observations: HashMap::new(),
        };
        t.rebuild_indexes();
        t
    }
}

impl From<Transcript> for Vec<Message> {
    fn from(t: Transcript) -> Self {
        t.messages
    }
}
