//! The per-step engine: planner call → record assistant message →
//! execute tool calls → record observations → repeat until a terminal
//! condition.
//!
//! Terminal conditions travel as errors so the runner can map them onto
//! run statuses in one place: `Ok` is completion, `RunSuspended` and
//! `MaxStepsExceeded` are accepted outcomes, anything else is fatal.

use rg_domain::cancel::CancelToken;
use rg_domain::error::{CoreError, Result};
use rg_domain::event::{Event, EventType};
use rg_domain::message::{Message, ToolResult};
use rg_domain::run::{RunState, RunStatus, Resolution};
use rg_planner::{Planner, PlannerRequest};
use rg_tools::{ExecEnv, ToolError, ToolExecutor};

use crate::broker::EventSink;

/// Per-invocation input.
#[derive(Debug, Clone)]
pub struct EngineInput {
    /// Step budget for this invocation.
    pub max_steps: u64,
    /// Resolution being applied; forwarded to the planner on the first
    /// step only.
    pub resolution: Option<Resolution>,
}

/// The collaborators one engine invocation talks to.
pub struct EngineServices<'a> {
    pub planner: &'a dyn Planner,
    pub tools: &'a dyn ToolExecutor,
    pub sink: &'a dyn EventSink,
    pub env: ExecEnv,
}

/// Publish, logging (never propagating) sink failures.
fn emit(sink: &dyn EventSink, cancel: &CancelToken, event: Event) {
    if let Err(e) = sink.publish(cancel, &event) {
        tracing::warn!(error = %e, "event publish failed");
    }
}

/// Drive one engine invocation over `state`.
///
/// The caller has already set the status to `Running`, bumped `step`, and
/// appended any command-supplied messages. On return the status reflects
/// the outcome except for fatal errors, which the caller records.
pub async fn run_engine(
    cancel: &CancelToken,
    state: &mut RunState,
    input: EngineInput,
    svc: &EngineServices<'_>,
) -> Result<()> {
    // The replay token is single-use: consumed by this invocation whether
    // or not the expected call shows up.
    let env = svc.env.clone().with_replay(state.approved_replay.take());
    let mut resolution = input.resolution;

    let mut steps_taken: u64 = 0;
    loop {
        cancel.check()?;

        if steps_taken >= input.max_steps {
            emit(
                svc.sink,
                cancel,
                Event::new(&state.id, state.step, EventType::RunFailed)
                    .with_description("max steps exceeded"),
            );
            state.transition(RunStatus::MaxStepsExceeded)?;
            return Err(CoreError::MaxStepsExceeded);
        }
        steps_taken += 1;

        let request = PlannerRequest {
            messages: state.messages.normalized()?,
            tools: svc.tools.catalogue(),
            resolution: resolution.take(),
        };
        let reply = svc.planner.plan(cancel, request).await?;

        // A reply whose tool calls all re-issue already-recorded ids is a
        // replay round: the assistant message is already in the transcript,
        // so the executions go straight to replacing the observations.
        let new_calls: Vec<_> = reply
            .tool_calls
            .iter()
            .filter(|c| !state.messages.has_call(&c.id))
            .cloned()
            .collect();
        let replay_round =
            !reply.tool_calls.is_empty() && new_calls.is_empty() && reply.requirement.is_none();

        if !replay_round {
            let message = Message::assistant_with_calls(reply.content.clone(), new_calls);
            state.messages.push_assistant(message.clone())?;
            emit(
                svc.sink,
                cancel,
                Event::new(&state.id, state.step, EventType::AssistantMessage)
                    .with_message(message),
            );
        }

        if let Some(requirement) = reply.requirement {
            tracing::info!(
                run_id = %state.id,
                requirement_id = %requirement.id,
                "run suspended on model-origin requirement"
            );
            emit(
                svc.sink,
                cancel,
                Event::new(&state.id, state.step, EventType::RunSuspended)
                    .with_description(requirement.prompt.clone()),
            );
            state.pending_requirement = Some(requirement);
            state.transition(RunStatus::Suspended)?;
            return Err(CoreError::RunSuspended);
        }

        if reply.tool_calls.is_empty() {
            state.output = reply.content;
            state.transition(RunStatus::Completed)?;
            emit(
                svc.sink,
                cancel,
                Event::new(&state.id, state.step, EventType::RunCompleted),
            );
            return Ok(());
        }

        // Execute in order; a suspension stops the batch.
        for call in &reply.tool_calls {
            cancel.check()?;
            match svc.tools.execute(cancel, call, &env).await {
                Ok(content) => {
                    let result = ToolResult::success(&call.id, &call.name, content);
                    state.messages.record_observation(&result)?;
                    emit(
                        svc.sink,
                        cancel,
                        Event::new(&state.id, state.step, EventType::ToolResultEvent)
                            .with_tool_result(result),
                    );
                }
                Err(ToolError::Suspend(requirement)) => {
                    let result =
                        ToolResult::suspended(&call.id, &call.name, requirement.prompt.clone());
                    state.messages.record_observation(&result)?;
                    emit(
                        svc.sink,
                        cancel,
                        Event::new(&state.id, state.step, EventType::ToolResultEvent)
                            .with_tool_result(result),
                    );
                    emit(
                        svc.sink,
                        cancel,
                        Event::new(&state.id, state.step, EventType::RunSuspended)
                            .with_description(requirement.prompt.clone()),
                    );
                    tracing::info!(
                        run_id = %state.id,
                        call_id = %requirement.tool_call_id,
                        "run suspended on tool-origin requirement"
                    );
                    state.pending_requirement = Some(requirement);
                    state.transition(RunStatus::Suspended)?;
                    return Err(CoreError::RunSuspended);
                }
                Err(ToolError::ReplayMismatch { call_id }) => {
                    return Err(CoreError::BashReplayMismatch { call_id });
                }
                Err(ToolError::Cancelled(e)) => return Err(e),
                Err(ToolError::Failed(message)) => {
                    let result = ToolResult::execution_error(&call.id, &call.name, message);
                    state.messages.record_observation(&result)?;
                    emit(
                        svc.sink,
                        cancel,
                        Event::new(&state.id, state.step, EventType::ToolResultEvent)
                            .with_tool_result(result),
                    );
                }
            }
        }
    }
}
