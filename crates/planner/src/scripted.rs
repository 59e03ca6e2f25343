//! Deterministic prompt-keyed planner.
//!
//! Dev mode and the integration suites run against this planner. The
//! latest user prompt (ignoring `[steer]`/`[resolution]` markers) selects
//! a behavior:
//!
//! - `[loop] …` — reply with one `echo` tool call every step, forever.
//! - `[suspend] <prompt>` — raise a model-origin approval requirement;
//!   once an approved resolution arrives, complete.
//! - `[block]` — park until the token is cancelled, then surface its error.
//! - `[e2e-bash-policy-two-stage]` — two policy-denied bash calls in
//!   sequence, each requiring an approved replay before the next.
//! - anything else — complete immediately with a short answer.

use rg_domain::cancel::CancelToken;
use rg_domain::error::Result;
use rg_domain::message::{FailureReason, Message, Role, ToolCall};
use rg_domain::run::{PendingRequirement, RequirementKind, ResolutionOutcome};

use crate::{Planner, PlannerReply, PlannerRequest};

/// Call ids and commands for the two-stage bash scenario.
const STAGE_ONE_CALL: &str = "call-bash-denied-1";
const STAGE_ONE_COMMAND: &str = "rm -rf /tmp/rungate-stage-one";
const STAGE_TWO_CALL: &str = "call-bash-denied-2";
const STAGE_TWO_COMMAND: &str = "rm -rf /tmp/rungate-stage-two";

pub struct ScriptedPlanner;

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScriptedPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, cancel: &CancelToken, req: PlannerRequest) -> Result<PlannerReply> {
        cancel.check()?;

        let directive = latest_directive(&req.messages).unwrap_or_default();

        if let Some(rest) = directive.strip_prefix("[loop]") {
            let n = req
                .messages
                .iter()
                .filter(|m| m.role == Role::Assistant)
                .count();
            let call = ToolCall::new(format!("call-loop-{}", n + 1), "echo")
                .with_arg("text", serde_json::json!(rest.trim()));
            return Ok(PlannerReply::calls("", vec![call]));
        }

        if let Some(prompt) = directive.strip_prefix("[suspend]") {
            let approved = req
                .resolution
                .as_ref()
                .is_some_and(|r| r.outcome == ResolutionOutcome::Approved);
            if approved {
                return Ok(PlannerReply::text(format!("approved: {}", prompt.trim())));
            }
            return Ok(PlannerReply::requirement(PendingRequirement::model(
                RequirementKind::Approval,
                prompt.trim(),
            )));
        }

        if directive.starts_with("[block]") {
            cancel.cancelled().await;
            return Err(cancel.err());
        }

        if directive.starts_with("[e2e-bash-policy-two-stage]") {
            return Ok(two_stage_reply(&req));
        }

        Ok(PlannerReply::text(format!("ok: {directive}")))
    }

    fn planner_id(&self) -> &str {
        "scripted"
    }
}

/// The last user message that is not a `[steer]`/`[resolution]` marker.
fn latest_directive(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .find(|c| !c.starts_with("[steer]") && !c.starts_with("[resolution]"))
        .map(str::to_owned)
}

// ── Two-stage bash scenario ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum StageState {
    /// The call has not been issued yet.
    NotIssued,
    /// Issued, observation still shows the policy suspension.
    Blocked,
    /// Issued and observed with a real (non-suspended) result.
    Done,
}

fn stage_state(messages: &[Message], call_id: &str) -> StageState {
    let issued = messages.iter().any(|m| {
        m.role == Role::Assistant && m.tool_calls.iter().any(|c| c.id == call_id)
    });
    if !issued {
        return StageState::NotIssued;
    }
    let blocked = messages.iter().any(|m| {
        m.role == Role::Tool
            && m.tool_call_id.as_deref() == Some(call_id)
            && m.failure_reason == Some(FailureReason::Suspended)
    });
    if blocked {
        StageState::Blocked
    } else {
        StageState::Done
    }
}

fn stage_call(call_id: &str, command: &str) -> ToolCall {
    ToolCall::new(call_id, "bash").with_arg("command", serde_json::json!(command))
}

fn two_stage_reply(req: &PlannerRequest) -> PlannerReply {
    let one = stage_state(&req.messages, STAGE_ONE_CALL);
    let two = stage_state(&req.messages, STAGE_TWO_CALL);
    let resolved = req.resolution.is_some();

    match (one, two) {
        (StageState::NotIssued, _) => {
            PlannerReply::calls("", vec![stage_call(STAGE_ONE_CALL, STAGE_ONE_COMMAND)])
        }
        // Re-issue the same call after an approval: the replay round.
        (StageState::Blocked, _) if resolved => {
            PlannerReply::calls("", vec![stage_call(STAGE_ONE_CALL, STAGE_ONE_COMMAND)])
        }
        (StageState::Done, StageState::NotIssued) => {
            PlannerReply::calls("", vec![stage_call(STAGE_TWO_CALL, STAGE_TWO_COMMAND)])
        }
        (StageState::Done, StageState::Blocked) if resolved => {
            PlannerReply::calls("", vec![stage_call(STAGE_TWO_CALL, STAGE_TWO_COMMAND)])
        }
        (StageState::Done, StageState::Done) => {
            PlannerReply::text("both stages executed after approval")
        }
        // Still blocked and nothing new to act on; repeat the stage call so
        // the executor re-raises the gate rather than inventing progress.
        (StageState::Blocked, _) => {
            PlannerReply::calls("", vec![stage_call(STAGE_ONE_CALL, STAGE_ONE_COMMAND)])
        }
        (StageState::Done, StageState::Blocked) => {
            PlannerReply::calls("", vec![stage_call(STAGE_TWO_CALL, STAGE_TWO_COMMAND)])
        }
    }
}
