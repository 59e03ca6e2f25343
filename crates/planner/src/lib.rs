//! Planner adapters — the seam between the run engine and whatever
//! produces the next assistant message.
//!
//! The engine hands a planner the normalized transcript, the tool
//! catalogue, and (on the first step after a resumption) the client's
//! resolution; the planner answers with content, tool calls, or a
//! model-origin requirement.

pub mod openai;
pub mod scripted;

use std::time::Duration;

use rg_domain::cancel::CancelToken;
use rg_domain::error::{CoreError, Result};
use rg_domain::message::{Message, ToolCall, ToolDefinition};
use rg_domain::run::{PendingRequirement, Resolution};

pub use openai::OpenAiPlanner;
pub use scripted::ScriptedPlanner;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Reply types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One planning request: the transcript as the planner may see it
/// (normalized — one observation per tool call), the tool catalogue,
/// and the optional resolution being applied this step.
#[derive(Debug, Clone)]
pub struct PlannerRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub resolution: Option<Resolution>,
}

/// The planner's answer for one step.
#[derive(Debug, Clone, Default)]
pub struct PlannerReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// A model-origin gate: the run suspends until the client resolves it.
    pub requirement: Option<PendingRequirement>,
}

impl PlannerReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            requirement: None,
        }
    }

    pub fn requirement(requirement: PendingRequirement) -> Self {
        Self {
            requirement: Some(requirement),
            ..Self::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core planner trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every planner adapter implements.
#[async_trait::async_trait]
pub trait Planner: Send + Sync {
    /// Produce the next assistant message for the given transcript.
    async fn plan(&self, cancel: &CancelToken, req: PlannerRequest) -> Result<PlannerReply>;

    /// A unique identifier for this planner instance.
    fn planner_id(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeout decorator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps any planner with a per-call deadline.
pub struct TimeoutPlanner<P> {
    inner: P,
    timeout: Duration,
}

impl<P: Planner> TimeoutPlanner<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait::async_trait]
impl<P: Planner> Planner for TimeoutPlanner<P> {
    async fn plan(&self, cancel: &CancelToken, req: PlannerRequest) -> Result<PlannerReply> {
        match tokio::time::timeout(self.timeout, self.inner.plan(cancel, req)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Planner(format!(
                "planner call timed out after {:?}",
                self.timeout
            ))),
        }
    }

    fn planner_id(&self) -> &str {
        self.inner.planner_id()
    }
}
