//! Command dispatch: `start`, `continue`, `follow-up`, `steer`, `cancel`.
//!
//! The runner owns everything a command needs to execute safely: the
//! store, the per-run lock map, the birth lock guarding creation, the
//! cancel registry for in-flight engine invocations, and the event sink.
//! One command executes per run at a time; `steer` alone is optimistic
//! (load → append → CAS save) so a concurrent steer surfaces a version
//! conflict instead of queueing behind a long engine invocation.

use std::sync::Arc;

use tokio::sync::Mutex;

use rg_domain::cancel::CancelToken;
use rg_domain::error::{CoreError, Result};
use rg_domain::event::{CommandKind, Event, EventType};
use rg_domain::message::Message;
use rg_domain::run::{
    validate_run_id, PendingRequirement, ReplayToken, Resolution, ResolutionOutcome,
    RequirementOrigin, RunIdGenerator, RunState, RunStatus,
};
use rg_planner::Planner;
use rg_tools::{ExecEnv, ToolExecutor};

use crate::broker::EventSink;
use crate::cancel_map::CancelMap;
use crate::locks::RunLockMap;
use crate::react::{run_engine, EngineInput, EngineServices};
use crate::store::RunStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct StartInput {
    pub run_id: Option<String>,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub max_steps: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ContinueInput {
    pub command_id: Option<String>,
    pub max_steps: Option<u64>,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Default)]
pub struct FollowUpInput {
    pub prompt: String,
    pub max_steps: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub default_max_steps: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_max_steps: 8,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Runner {
    store: Arc<dyn RunStore>,
    planner: Arc<dyn Planner>,
    tools: Arc<dyn ToolExecutor>,
    sink: Arc<dyn EventSink>,
    env: ExecEnv,
    config: RunnerConfig,
    locks: RunLockMap,
    /// Guards creation of new run ids so two simultaneous starts with the
    /// same explicit id cannot both create state.
    birth: Mutex<()>,
    cancels: CancelMap,
    ids: RunIdGenerator,
}

impl Runner {
    pub fn new(
        store: Arc<dyn RunStore>,
        planner: Arc<dyn Planner>,
        tools: Arc<dyn ToolExecutor>,
        sink: Arc<dyn EventSink>,
        env: ExecEnv,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            planner,
            tools,
            sink,
            env,
            config,
            locks: RunLockMap::new(),
            birth: Mutex::new(()),
            cancels: CancelMap::new(),
            ids: RunIdGenerator::new(),
        }
    }

    fn emit(&self, cancel: &CancelToken, event: Event) {
        if let Err(e) = self.sink.publish(cancel, &event) {
            tracing::warn!(error = %e, "event publish failed");
        }
    }

    /// Checkpoint + applied pair closing every applied command.
    fn emit_command_boundary(&self, cancel: &CancelToken, state: &RunState, kind: CommandKind) {
        self.emit(
            cancel,
            Event::new(&state.id, state.step, EventType::RunCheckpoint),
        );
        self.emit(
            cancel,
            Event::new(&state.id, state.step, EventType::CommandApplied).with_command_kind(kind),
        );
    }

    /// Token for the save and boundary events after the engine ran: a
    /// request token that died mid-engine must not keep the terminal state
    /// out of the store or its events out of the history.
    fn closing_token(cancel: &CancelToken) -> CancelToken {
        if cancel.is_cancelled() {
            CancelToken::new()
        } else {
            cancel.clone()
        }
    }

    /// Read-only snapshot for `GET /v1/runs/{id}`.
    pub async fn get(&self, cancel: &CancelToken, run_id: &str) -> Result<RunState> {
        self.store.load(cancel, run_id).await
    }

    // ── start ─────────────────────────────────────────────────────────

    pub async fn start(&self, cancel: &CancelToken, input: StartInput) -> Result<RunState> {
        if input.user_prompt.trim().is_empty() {
            return Err(CoreError::CommandInvalid("user_prompt is required".into()));
        }
        let run_id = match &input.run_id {
            Some(id) => {
                validate_run_id(id)?;
                id.clone()
            }
            None => self.ids.next_id(),
        };

        let mut state = RunState::new(&run_id);
        if let Some(system) = &input.system_prompt {
            if !system.is_empty() {
                state.messages.push(Message::system(system));
            }
        }
        state.messages.push(Message::user(&input.user_prompt));
        state.version = 1;

        {
            let _birth = self.birth.lock().await;
            self.store.create(cancel, &state).await?;
        }

        let _permit = self.locks.acquire(cancel, &run_id).await?;
        state.step = 1;
        state.transition(RunStatus::Running)?;
        self.emit(
            cancel,
            Event::new(&run_id, state.step, EventType::RunStarted)
                .with_description(input.user_prompt.clone()),
        );

        let engine_input = EngineInput {
            max_steps: input.max_steps.unwrap_or(self.config.default_max_steps),
            resolution: None,
        };
        self.run_engine_for(cancel, &mut state, engine_input).await?;

        let closing = Self::closing_token(cancel);
        self.persist(&closing, &mut state).await?;
        self.emit_command_boundary(&closing, &state, CommandKind::Start);
        Ok(state)
    }

    // ── continue ──────────────────────────────────────────────────────

    pub async fn continue_run(
        &self,
        cancel: &CancelToken,
        run_id: &str,
        input: ContinueInput,
    ) -> Result<RunState> {
        let _permit = self.locks.acquire(cancel, run_id).await?;
        let mut state = self.store.load(cancel, run_id).await?;

        // At-most-once: a repeated command id returns the stored state
        // without re-executing or emitting anything.
        if input.command_id.is_some() && state.last_command_id == input.command_id {
            tracing::debug!(run_id, command_id = ?input.command_id, "duplicate command id, replaying response");
            return Ok(state);
        }

        Self::check_continuable(&state)?;
        let resolution = self.apply_resolution(&mut state, input.resolution)?;

        state.step += 1;
        state.last_command_id = input.command_id;
        state.transition(RunStatus::Running)?;

        let engine_input = EngineInput {
            max_steps: input.max_steps.unwrap_or(self.config.default_max_steps),
            resolution,
        };
        self.run_engine_for(cancel, &mut state, engine_input).await?;

        let closing = Self::closing_token(cancel);
        self.persist(&closing, &mut state).await?;
        self.emit_command_boundary(&closing, &state, CommandKind::Continue);
        Ok(state)
    }

    // ── follow-up ─────────────────────────────────────────────────────

    pub async fn follow_up(
        &self,
        cancel: &CancelToken,
        run_id: &str,
        input: FollowUpInput,
    ) -> Result<RunState> {
        if input.prompt.trim().is_empty() {
            return Err(CoreError::CommandInvalid("prompt is required".into()));
        }
        let _permit = self.locks.acquire(cancel, run_id).await?;
        let mut state = self.store.load(cancel, run_id).await?;

        Self::check_continuable(&state)?;
        // A follow-up cannot carry a resolution, so a pending requirement
        // still gates it.
        if state.pending_requirement.is_some() {
            return Err(CoreError::ResolutionRequired);
        }

        state.messages.push(Message::user(&input.prompt));
        state.step += 1;
        state.transition(RunStatus::Running)?;

        let engine_input = EngineInput {
            max_steps: input.max_steps.unwrap_or(self.config.default_max_steps),
            resolution: None,
        };
        self.run_engine_for(cancel, &mut state, engine_input).await?;

        let closing = Self::closing_token(cancel);
        self.persist(&closing, &mut state).await?;
        self.emit_command_boundary(&closing, &state, CommandKind::FollowUp);
        Ok(state)
    }

    // ── steer ─────────────────────────────────────────────────────────

    /// Append a steering instruction without running the engine.
    ///
    /// Deliberately lock-free: the CAS save is the serialization point, so
    /// a steer never queues behind a long-running engine invocation and a
    /// racing steer loses with `RunVersionConflict`.
    pub async fn steer(
        &self,
        cancel: &CancelToken,
        run_id: &str,
        instruction: &str,
    ) -> Result<RunState> {
        if instruction.trim().is_empty() {
            return Err(CoreError::CommandInvalid("instruction is required".into()));
        }
        let mut state = self.store.load(cancel, run_id).await?;
        if state.status.is_terminal() {
            return Err(CoreError::RunNotContinuable(run_id.to_owned()));
        }

        state
            .messages
            .push(Message::user(format!("[steer] {instruction}")));
        state.step += 1;
        state.version += 1;
        self.store.save(cancel, &state).await?;

        self.emit_command_boundary(cancel, &state, CommandKind::Steer);
        Ok(state)
    }

    // ── cancel ────────────────────────────────────────────────────────

    pub async fn cancel_run(&self, cancel: &CancelToken, run_id: &str) -> Result<RunState> {
        // Interrupt any in-flight engine invocation before queueing for
        // the lock, otherwise a blocked planner call would starve us.
        // `interrupted` is true only when THIS call performed the explicit
        // transition; a concurrent cancel racing the same invocation gets
        // false and falls through to the terminal-status check.
        let interrupted = self.cancels.signal(run_id);

        let _permit = self.locks.acquire(cancel, run_id).await?;
        let mut state = self.store.load(cancel, run_id).await?;

        if state.status == RunStatus::Cancelled && interrupted {
            // Our own signal interrupted the running command, which already
            // persisted the cancellation. First cancel wins; report it.
            return Ok(state);
        }
        if state.status.is_terminal() {
            return Err(CoreError::RunNotCancellable(run_id.to_owned()));
        }

        state.transition(RunStatus::Cancelled)?;
        state.step += 1;
        state.version += 1;
        self.store.save(cancel, &state).await?;

        self.emit(cancel, Event::new(run_id, state.step, EventType::RunCancelled));
        self.emit_command_boundary(cancel, &state, CommandKind::Cancel);
        Ok(state)
    }

    // ── internals ─────────────────────────────────────────────────────

    /// Bump the version and save. Callers pass the closing token so the
    /// write survives a request token that died mid-engine.
    async fn persist(&self, cancel: &CancelToken, state: &mut RunState) -> Result<()> {
        state.version += 1;
        self.store.save(cancel, state).await
    }

    fn check_continuable(state: &RunState) -> Result<()> {
        match state.status {
            RunStatus::Suspended | RunStatus::MaxStepsExceeded | RunStatus::Running => Ok(()),
            _ => Err(CoreError::RunNotContinuable(state.id.clone())),
        }
    }

    /// Validate the supplied resolution against the pending requirement
    /// and apply its side effects. Returns the resolution to forward to
    /// the planner.
    fn apply_resolution(
        &self,
        state: &mut RunState,
        resolution: Option<Resolution>,
    ) -> Result<Option<Resolution>> {
        match (state.pending_requirement.take(), resolution) {
            (Some(requirement), Some(resolution)) => {
                if let Err(e) = resolution.matches(&requirement) {
                    // Leave the requirement pending for a corrected retry.
                    state.pending_requirement = Some(requirement);
                    return Err(e);
                }
                self.install_resolution(state, &requirement, &resolution);
                Ok(Some(resolution))
            }
            (Some(requirement), None) => {
                state.pending_requirement = Some(requirement);
                Err(CoreError::ResolutionRequired)
            }
            (None, Some(_)) => Err(CoreError::ResolutionUnexpected),
            (None, None) => Ok(None),
        }
    }

    fn install_resolution(
        &self,
        state: &mut RunState,
        requirement: &PendingRequirement,
        resolution: &Resolution,
    ) {
        let approved_tool_replay = requirement.origin == RequirementOrigin::Tool
            && resolution.outcome == ResolutionOutcome::Approved;
        if approved_tool_replay {
            tracing::info!(
                run_id = %state.id,
                call_id = %requirement.tool_call_id,
                "installing approved replay token"
            );
            state.approved_replay = Some(ReplayToken {
                tool_call_id: requirement.tool_call_id.clone(),
                fingerprint: requirement.fingerprint.clone(),
            });
        } else {
            state.messages.push(Message::user(resolution.marker()));
        }
    }

    /// Run the engine with a registered, linkable token and map its
    /// outcome onto the run status.
    async fn run_engine_for(
        &self,
        cancel: &CancelToken,
        state: &mut RunState,
        input: EngineInput,
    ) -> Result<()> {
        let engine_cancel = self.cancels.register(&state.id);

        // Propagate ambient cancellation (client disconnect, shutdown)
        // into the engine token; the guard closes the relay when the
        // invocation ends.
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        {
            let parent = cancel.clone();
            let child = engine_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = parent.cancelled() => child.cancel("request cancelled"),
                    _ = done_rx => {}
                }
            });
        }

        let services = EngineServices {
            planner: self.planner.as_ref(),
            tools: self.tools.as_ref(),
            sink: self.sink.as_ref(),
            env: self.env.clone(),
        };
        let outcome = run_engine(&engine_cancel, state, input, &services).await;
        drop(done_tx);
        let explicit_cancel = self.cancels.finish(&state.id);

        match outcome {
            // Completed / MaxStepsExceeded / Suspended transitions were
            // applied by the engine; all three are accepted outcomes.
            Ok(()) => Ok(()),
            Err(e) if e.is_lifecycle_outcome() => Ok(()),
            Err(CoreError::Cancelled(reason)) if explicit_cancel => {
                state.transition(RunStatus::Cancelled)?;
                state.error = reason;
                self.emit(
                    &Self::closing_token(cancel),
                    Event::new(&state.id, state.step, EventType::RunCancelled),
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(run_id = %state.id, error = %e, "engine failed");
                state.transition(RunStatus::Failed)?;
                state.error = e.to_string();
                self.emit(
                    &Self::closing_token(cancel),
                    Event::new(&state.id, state.step, EventType::RunFailed)
                        .with_description(state.error.clone()),
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use rg_domain::run::RequirementKind;
    use rg_planner::ScriptedPlanner;
    use rg_tools::ToolRegistry;

    use crate::broker::{FanoutSink, StreamBroker, TracingSink};
    use crate::store::MemoryRunStore;

    struct Fixture {
        runner: Runner,
        broker: Arc<StreamBroker>,
        store: Arc<MemoryRunStore>,
    }

    fn fixture() -> Fixture {
        fixture_with_store(Arc::new(MemoryRunStore::new()))
    }

    fn fixture_with_store(store: Arc<MemoryRunStore>) -> Fixture {
        let broker = Arc::new(StreamBroker::new(64));
        let sink = Arc::new(FanoutSink::new(vec![
            broker.clone() as Arc<dyn EventSink>,
            Arc::new(TracingSink),
        ]));
        let env = ExecEnv::new(
            PathBuf::from("/tmp"),
            Duration::from_secs(30),
            Arc::new(regex::RegexSet::new([r"^\s*rm\s", r"^\s*sudo\s"]).unwrap()),
        );
        let runner = Runner::new(
            store.clone(),
            Arc::new(ScriptedPlanner::new()),
            Arc::new(ToolRegistry::with_builtins()),
            sink,
            env,
            RunnerConfig::default(),
        );
        Fixture {
            runner,
            broker,
            store,
        }
    }

    fn event_types(fx: &Fixture, run_id: &str) -> Vec<EventType> {
        fx.broker
            .events_after(run_id, 0)
            .unwrap()
            .into_iter()
            .map(|f| f.event.event_type)
            .collect()
    }

    fn approved(requirement: &PendingRequirement) -> Resolution {
        Resolution {
            requirement_id: requirement.id.clone(),
            kind: requirement.kind,
            outcome: ResolutionOutcome::Approved,
            value: None,
        }
    }

    #[tokio::test]
    async fn start_completes_simple_run() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "hello there".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(state.id, "run-000001");
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.step, 1);
        assert_eq!(state.version, 2);
        assert_eq!(state.output, "ok: hello there");

        assert_eq!(
            event_types(&fx, &state.id),
            vec![
                EventType::RunStarted,
                EventType::AssistantMessage,
                EventType::RunCompleted,
                EventType::RunCheckpoint,
                EventType::CommandApplied,
            ]
        );
    }

    #[tokio::test]
    async fn start_loop_run_hits_step_budget() {
        let fx = fixture();
        let state = fx
            .runner
            .start(
                &CancelToken::new(),
                StartInput {
                    user_prompt: "[loop] a".into(),
                    max_steps: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(state.status, RunStatus::MaxStepsExceeded);
        assert_eq!(state.step, 1);
        assert_eq!(
            event_types(&fx, &state.id),
            vec![
                EventType::RunStarted,
                EventType::AssistantMessage,
                EventType::ToolResultEvent,
                EventType::RunFailed,
                EventType::RunCheckpoint,
                EventType::CommandApplied,
            ]
        );
    }

    #[tokio::test]
    async fn start_duplicate_explicit_id_conflicts() {
        let fx = fixture();
        let input = StartInput {
            run_id: Some("my-run".into()),
            user_prompt: "hi".into(),
            ..Default::default()
        };
        fx.runner.start(&CancelToken::new(), input.clone()).await.unwrap();
        let err = fx.runner.start(&CancelToken::new(), input).await.unwrap_err();
        assert!(matches!(err, CoreError::CommandConflict(_)));
    }

    #[tokio::test]
    async fn start_rejects_bad_input() {
        let fx = fixture();
        let err = fx
            .runner
            .start(
                &CancelToken::new(),
                StartInput {
                    user_prompt: "  ".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CommandInvalid(_)));

        let err = fx
            .runner
            .start(
                &CancelToken::new(),
                StartInput {
                    run_id: Some("bad id!".into()),
                    user_prompt: "hi".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRunId(_)));
    }

    #[tokio::test]
    async fn suspended_run_requires_resolution() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "[suspend] gate".into(),
                    max_steps: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Suspended);
        let requirement = state.pending_requirement.clone().unwrap();

        // No resolution: gated.
        let err = fx
            .runner
            .continue_run(&cancel, &state.id, ContinueInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ResolutionRequired));

        // Mismatched resolution: invalid, requirement survives.
        let err = fx
            .runner
            .continue_run(
                &cancel,
                &state.id,
                ContinueInput {
                    resolution: Some(Resolution {
                        requirement_id: "wrong".into(),
                        kind: RequirementKind::Approval,
                        outcome: ResolutionOutcome::Approved,
                        value: None,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ResolutionInvalid(_)));

        // Matching resolution: completes.
        let state = fx
            .runner
            .continue_run(
                &cancel,
                &state.id,
                ContinueInput {
                    resolution: Some(approved(&requirement)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.step, 2);
    }

    #[tokio::test]
    async fn unexpected_resolution_is_rejected() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "[loop] x".into(),
                    max_steps: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = fx
            .runner
            .continue_run(
                &cancel,
                &state.id,
                ContinueInput {
                    resolution: Some(Resolution {
                        requirement_id: "whatever".into(),
                        kind: RequirementKind::Approval,
                        outcome: ResolutionOutcome::Approved,
                        value: None,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ResolutionUnexpected));
    }

    #[tokio::test]
    async fn two_stage_bash_approval_replay() {
        let fx = fixture();
        let cancel = CancelToken::new();

        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "[e2e-bash-policy-two-stage]".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Suspended);
        let req1 = state.pending_requirement.clone().unwrap();
        assert_eq!(req1.tool_call_id, "call-bash-denied-1");
        assert!(!req1.fingerprint.is_empty());

        let state = fx
            .runner
            .continue_run(
                &cancel,
                &state.id,
                ContinueInput {
                    resolution: Some(approved(&req1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Suspended);
        let req2 = state.pending_requirement.clone().unwrap();
        assert_eq!(req2.tool_call_id, "call-bash-denied-2");
        assert_ne!(req2.fingerprint, req1.fingerprint);

        // Frames after the first command boundary: the replacement result
        // leads, then the stage-two suspension, then the boundary pair.
        let frames = fx.broker.events_after(&state.id, 6).unwrap();
        let types: Vec<EventType> = frames.iter().map(|f| f.event.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::ToolResultEvent,
                EventType::AssistantMessage,
                EventType::ToolResultEvent,
                EventType::RunSuspended,
                EventType::RunCheckpoint,
                EventType::CommandApplied,
            ]
        );
        // The leading tool_result is the successful replacement for stage one.
        let first = frames[0].event.tool_result.as_ref().unwrap();
        assert_eq!(first.call_id, "call-bash-denied-1");
        assert!(!first.is_error);
        assert_eq!(first.failure_reason, None);

        let state = fx
            .runner
            .continue_run(
                &cancel,
                &state.id,
                ContinueInput {
                    resolution: Some(approved(&req2)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_command_id_replays_response() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "[suspend] gate".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let requirement = state.pending_requirement.clone().unwrap();

        let input = ContinueInput {
            command_id: Some("dedup-1".into()),
            resolution: Some(approved(&requirement)),
            ..Default::default()
        };
        let first = fx
            .runner
            .continue_run(&cancel, &state.id, input.clone())
            .await
            .unwrap();
        assert_eq!(first.status, RunStatus::Completed);

        let frames_before = fx.broker.latest_id(&state.id);
        let second = fx
            .runner
            .continue_run(&cancel, &state.id, input)
            .await
            .unwrap();

        // Byte-identical state, no new events.
        assert_eq!(second, first);
        assert_eq!(fx.broker.latest_id(&state.id), frames_before);
        // Exactly one continue was applied.
        let applied = fx
            .broker
            .events_after(&state.id, 0)
            .unwrap()
            .into_iter()
            .filter(|f| {
                f.event.event_type == EventType::CommandApplied
                    && f.event.command_kind == Some(CommandKind::Continue)
            })
            .count();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn follow_up_resumes_exhausted_run() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "[loop] a".into(),
                    max_steps: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::MaxStepsExceeded);

        let state = fx
            .runner
            .follow_up(
                &cancel,
                &state.id,
                FollowUpInput {
                    prompt: "finish flow".into(),
                    max_steps: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.step, 2);
        assert_eq!(state.output, "ok: finish flow");

        // Cursor-resume shape: four new frames after the first six.
        let frames = fx.broker.events_after(&state.id, 6).unwrap();
        let ids: Vec<i64> = frames.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![7, 8, 9, 10]);
        let types: Vec<EventType> = frames.iter().map(|f| f.event.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::AssistantMessage,
                EventType::RunCompleted,
                EventType::RunCheckpoint,
                EventType::CommandApplied,
            ]
        );
    }

    #[tokio::test]
    async fn follow_up_on_gated_suspension_requires_resolution() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "[suspend] gate".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = fx
            .runner
            .follow_up(
                &cancel,
                &state.id,
                FollowUpInput {
                    prompt: "but actually".into(),
                    max_steps: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ResolutionRequired));
    }

    #[tokio::test]
    async fn continue_terminal_run_is_forbidden() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "done quickly".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Completed);

        let err = fx
            .runner
            .continue_run(&cancel, &state.id, ContinueInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RunNotContinuable(_)));
    }

    #[tokio::test]
    async fn steer_appends_marker_and_bumps_counters() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "[suspend] gate".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let (step, version) = (state.step, state.version);

        let state = fx
            .runner
            .steer(&cancel, &state.id, "focus on the tests")
            .await
            .unwrap();
        assert_eq!(state.step, step + 1);
        assert_eq!(state.version, version + 1);
        let last = state.messages.messages().last().unwrap();
        assert_eq!(last.content, "[steer] focus on the tests");

        // Steer does not run the engine: still suspended.
        assert_eq!(state.status, RunStatus::Suspended);
    }

    /// Store wrapper that injects a concurrent writer between one `load`
    /// and the following `save`, making the steer race deterministic.
    struct RacingStore {
        inner: Arc<MemoryRunStore>,
        race_armed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl RunStore for RacingStore {
        async fn create(&self, cancel: &CancelToken, state: &RunState) -> Result<()> {
            self.inner.create(cancel, state).await
        }

        async fn load(&self, cancel: &CancelToken, run_id: &str) -> Result<RunState> {
            let snapshot = self.inner.load(cancel, run_id).await?;
            if self
                .race_armed
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                let mut winner = snapshot.clone();
                winner.version += 1;
                winner
                    .messages
                    .push(Message::user("[steer] the other steer won"));
                self.inner.save(cancel, &winner).await?;
            }
            // The caller keeps working on the now-stale snapshot.
            Ok(snapshot)
        }

        async fn save(&self, cancel: &CancelToken, state: &RunState) -> Result<()> {
            self.inner.save(cancel, state).await
        }
    }

    #[tokio::test]
    async fn steer_version_conflict_surfaces() {
        let store = Arc::new(RacingStore {
            inner: Arc::new(MemoryRunStore::new()),
            race_armed: std::sync::atomic::AtomicBool::new(false),
        });
        let broker = Arc::new(StreamBroker::new(64));
        let env = ExecEnv::new(
            PathBuf::from("/tmp"),
            Duration::from_secs(30),
            Arc::new(regex::RegexSet::new([r"^\s*rm\s"]).unwrap()),
        );
        let runner = Runner::new(
            store.clone(),
            Arc::new(ScriptedPlanner::new()),
            Arc::new(ToolRegistry::with_builtins()),
            broker.clone(),
            env,
            RunnerConfig::default(),
        );

        let cancel = CancelToken::new();
        let state = runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "[suspend] gate".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Arm the race: the next load is immediately followed by a
        // concurrent writer's save.
        store
            .race_armed
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = runner.steer(&cancel, &state.id, "second").await.unwrap_err();
        assert!(matches!(err, CoreError::RunVersionConflict { .. }));

        // The winning write is what the store holds.
        let final_state = store.inner.load(&cancel, &state.id).await.unwrap();
        assert_eq!(final_state.version, state.version + 1);
    }

    #[tokio::test]
    async fn cancel_suspended_run_then_repeat_fails() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "[suspend] gate".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let state = fx.runner.cancel_run(&cancel, &state.id).await.unwrap();
        assert_eq!(state.status, RunStatus::Cancelled);

        let types = event_types(&fx, &state.id);
        assert_eq!(
            &types[types.len() - 3..],
            &[
                EventType::RunCancelled,
                EventType::RunCheckpoint,
                EventType::CommandApplied,
            ]
        );

        let err = fx.runner.cancel_run(&cancel, &state.id).await.unwrap_err();
        assert!(matches!(err, CoreError::RunNotCancellable(_)));

        // A cancelled run cannot be continued either.
        let err = fx
            .runner
            .continue_run(&cancel, &state.id, ContinueInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RunNotContinuable(_)));
    }

    #[tokio::test]
    async fn cancel_interrupts_inflight_engine() {
        let fx = Arc::new(fixture());
        let cancel = CancelToken::new();

        let fx2 = fx.clone();
        let start_handle = tokio::spawn(async move {
            fx2.runner
                .start(
                    &CancelToken::new(),
                    StartInput {
                        run_id: Some("blocked-run".into()),
                        user_prompt: "[block]".into(),
                        ..Default::default()
                    },
                )
                .await
        });

        // Wait until the engine invocation registers itself.
        for _ in 0..100 {
            if fx.store.load(&cancel, "blocked-run").await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let cancelled = fx.runner.cancel_run(&cancel, "blocked-run").await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);

        let started = start_handle.await.unwrap().unwrap();
        assert_eq!(started.status, RunStatus::Cancelled);
        assert!(!started.error.is_empty());
    }

    #[tokio::test]
    async fn concurrent_cancels_on_inflight_engine_yield_one_winner() {
        let fx = Arc::new(fixture());
        let cancel = CancelToken::new();

        let fx2 = fx.clone();
        let start_handle = tokio::spawn(async move {
            fx2.runner
                .start(
                    &CancelToken::new(),
                    StartInput {
                        run_id: Some("contested".into()),
                        user_prompt: "[block]".into(),
                        ..Default::default()
                    },
                )
                .await
        });

        for _ in 0..100 {
            if fx.store.load(&cancel, "contested").await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fx_a = fx.clone();
        let fx_b = fx.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move {
                fx_a.runner.cancel_run(&CancelToken::new(), "contested").await
            }),
            tokio::spawn(async move {
                fx_b.runner.cancel_run(&CancelToken::new(), "contested").await
            }),
        );
        let results = [a.unwrap(), b.unwrap()];

        // Exactly one cancel owns the interruption; the other observes a
        // terminal run and is rejected.
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "got {results:?}");
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(CoreError::RunNotCancellable(_)))));

        let started = start_handle.await.unwrap().unwrap();
        assert_eq!(started.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn ambient_cancellation_records_failed() {
        let fx = fixture();
        let request_cancel = CancelToken::new();
        let c2 = request_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            c2.cancel("client disconnected");
        });

        let state = fx
            .runner
            .start(
                &request_cancel,
                StartInput {
                    run_id: Some("doomed".into()),
                    user_prompt: "[block]".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // No explicit cancel command was issued, so the ambient token
        // cancellation records a failure, and the terminal state is
        // persisted despite the dead request token.
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.error.contains("request cancelled"));

        let stored = fx
            .store
            .load(&CancelToken::new(), "doomed")
            .await
            .unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn get_returns_snapshot() {
        let fx = fixture();
        let cancel = CancelToken::new();
        let state = fx
            .runner
            .start(
                &cancel,
                StartInput {
                    user_prompt: "quick one".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let snapshot = fx.runner.get(&cancel, &state.id).await.unwrap();
        assert_eq!(snapshot, state);

        let err = fx.runner.get(&cancel, "run-404").await.unwrap_err();
        assert!(matches!(err, CoreError::RunNotFound(_)));
    }
}
