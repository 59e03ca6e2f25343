//! Run command endpoints.
//!
//! - `POST /v1/runs/start`            — create and drive a new run
//! - `POST /v1/runs/:id/continue`     — resume (with optional resolution)
//! - `POST /v1/runs/:id/follow-up`    — append a prompt and resume
//! - `POST /v1/runs/:id/steer`        — inject a steering instruction
//! - `POST /v1/runs/:id/cancel`       — cancel
//! - `GET  /v1/runs/:id`              — state snapshot

use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use rg_domain::cancel::CancelToken;
use rg_domain::error::CoreError;
use rg_domain::run::{PendingRequirement, Resolution, RunState, RunStatus};
use rg_engine::{ContinueInput, FollowUpInput, StartInput};

use crate::state::AppState;

use super::error::ApiError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StartBody {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    #[serde(default)]
    pub max_steps: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContinueBody {
    #[serde(default)]
    pub command_id: Option<String>,
    #[serde(default)]
    pub max_steps: Option<u64>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Deserialize)]
pub struct FollowUpBody {
    pub prompt: String,
    #[serde(default)]
    pub max_steps: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SteerBody {
    pub instruction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStateResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub step: u64,
    pub version: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_requirement: Option<PendingRequirement>,
}

impl From<RunState> for RunStateResponse {
    fn from(state: RunState) -> Self {
        Self {
            run_id: state.id,
            status: state.status,
            step: state.step,
            version: state.version,
            output: state.output,
            error: state.error,
            pending_requirement: state.pending_requirement,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a command to completion on its own task so a dropped connection
/// cannot abort it mid-command.
async fn spawn_command<F>(fut: F) -> Result<Json<RunStateResponse>, ApiError>
where
    F: std::future::Future<Output = Result<RunState, CoreError>> + Send + 'static,
{
    let state = tokio::spawn(fut)
        .await
        .map_err(|e| ApiError(CoreError::Other(format!("command task failed: {e}"))))??;
    Ok(Json(state.into()))
}

pub async fn start(
    State(state): State<AppState>,
    Json(body): Json<StartBody>,
) -> Result<Json<RunStateResponse>, ApiError> {
    let runner = state.runner.clone();
    spawn_command(async move {
        runner
            .start(
                &CancelToken::new(),
                StartInput {
                    run_id: body.run_id,
                    system_prompt: body.system_prompt,
                    user_prompt: body.user_prompt,
                    max_steps: body.max_steps,
                },
            )
            .await
    })
    .await
}

pub async fn continue_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<ContinueBody>,
) -> Result<Json<RunStateResponse>, ApiError> {
    let runner = state.runner.clone();
    spawn_command(async move {
        runner
            .continue_run(
                &CancelToken::new(),
                &run_id,
                ContinueInput {
                    command_id: body.command_id,
                    max_steps: body.max_steps,
                    resolution: body.resolution,
                },
            )
            .await
    })
    .await
}

pub async fn follow_up(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<FollowUpBody>,
) -> Result<Json<RunStateResponse>, ApiError> {
    let runner = state.runner.clone();
    spawn_command(async move {
        runner
            .follow_up(
                &CancelToken::new(),
                &run_id,
                FollowUpInput {
                    prompt: body.prompt,
                    max_steps: body.max_steps,
                },
            )
            .await
    })
    .await
}

pub async fn steer(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<SteerBody>,
) -> Result<Json<RunStateResponse>, ApiError> {
    let runner = state.runner.clone();
    spawn_command(async move {
        runner
            .steer(&CancelToken::new(), &run_id, &body.instruction)
            .await
    })
    .await
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStateResponse>, ApiError> {
    let runner = state.runner.clone();
    spawn_command(async move { runner.cancel_run(&CancelToken::new(), &run_id).await }).await
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStateResponse>, ApiError> {
    let run = state.runner.get(&CancelToken::new(), &run_id).await?;
    Ok(Json(run.into()))
}
