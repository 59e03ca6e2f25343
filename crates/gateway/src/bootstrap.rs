//! Wiring: config → planner, tools, broker, runner, shared state.
//!
//! Kept out of `main` so the integration suites can stand up the exact
//! production object graph.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use regex::RegexSet;

use rg_domain::config::{Config, PlannerMode};
use rg_engine::{
    EventSink, FanoutSink, MemoryRunStore, Runner, RunnerConfig, StreamBroker, TracingSink,
};
use rg_planner::{OpenAiPlanner, Planner, ScriptedPlanner, TimeoutPlanner};
use rg_tools::{ExecEnv, ToolRegistry};

use crate::api::auth::token_hash_from_env;
use crate::state::AppState;

pub fn build_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let approval_patterns = RegexSet::new(&config.tools.approval_patterns)
        .context("compiling tools.approval_patterns")?;
    let env = ExecEnv::new(
        config.tools.workspace_root.clone(),
        Duration::from_secs(config.tools.bash_timeout_secs),
        Arc::new(approval_patterns),
    );

    let planner: Arc<dyn Planner> = match config.planner.mode {
        PlannerMode::Scripted => Arc::new(ScriptedPlanner::new()),
        PlannerMode::Openai => {
            let api_key = std::env::var(&config.planner.api_key_env).unwrap_or_default();
            if api_key.is_empty() {
                tracing::warn!(
                    env_var = %config.planner.api_key_env,
                    "planner API key env var is empty"
                );
            }
            Arc::new(TimeoutPlanner::new(
                OpenAiPlanner::new(&config.planner.base_url, &config.planner.model, api_key),
                Duration::from_secs(config.planner.timeout_secs),
            ))
        }
    };
    tracing::info!(planner = planner.planner_id(), "planner ready");

    let tools = Arc::new(ToolRegistry::with_builtins());
    let broker = Arc::new(StreamBroker::new(config.engine.history_limit));
    let sink = Arc::new(FanoutSink::new(vec![
        broker.clone() as Arc<dyn EventSink>,
        Arc::new(TracingSink),
    ]));

    let runner = Arc::new(Runner::new(
        Arc::new(MemoryRunStore::new()),
        planner,
        tools,
        sink,
        env,
        RunnerConfig {
            default_max_steps: config.engine.max_steps,
        },
    ));

    let api_token_hash = token_hash_from_env(&config.server.api_token_env).map(Arc::new);

    Ok(AppState {
        config,
        runner,
        broker,
        api_token_hash,
        ready: Arc::new(AtomicBool::new(false)),
    })
}
