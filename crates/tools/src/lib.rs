//! Tool execution — the seam between the run engine and the tools a
//! planner may invoke.
//!
//! A tool either returns output, fails (the engine records an error
//! observation and moves on), or raises a *suspend request*: a
//! tool-origin approval requirement carrying the call id and a content
//! fingerprint. An approved resolution later installs a single-use
//! replay token that bypasses the policy gate for exactly that
//! `(call_id, fingerprint)` pair.

pub mod bash;
pub mod builtin;
pub mod fingerprint;
pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::RegexSet;

use rg_domain::cancel::CancelToken;
use rg_domain::error::CoreError;
use rg_domain::message::{ToolCall, ToolDefinition};
use rg_domain::run::{PendingRequirement, ReplayToken};

pub use registry::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution environment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-invocation context handed to every tool.
#[derive(Clone)]
pub struct ExecEnv {
    pub workspace_root: PathBuf,
    pub bash_timeout: Duration,
    /// Commands matching any of these require human approval.
    pub approval_patterns: Arc<RegexSet>,
    /// Installed by an approved tool-origin resolution; valid for one
    /// engine invocation.
    pub replay: Option<ReplayToken>,
}

impl ExecEnv {
    pub fn new(
        workspace_root: PathBuf,
        bash_timeout: Duration,
        approval_patterns: Arc<RegexSet>,
    ) -> Self {
        Self {
            workspace_root,
            bash_timeout,
            approval_patterns,
            replay: None,
        }
    }

    pub fn with_replay(mut self, replay: Option<ReplayToken>) -> Self {
        self.replay = replay;
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a tool invocation can fail.
#[derive(Debug)]
pub enum ToolError {
    /// Execution is gated: the run suspends until the requirement is
    /// resolved. Always tool-origin, always carries a fingerprint.
    Suspend(PendingRequirement),
    /// A replay token was installed for this call id but the recomputed
    /// fingerprint differs — the approval does not cover this invocation.
    ReplayMismatch { call_id: String },
    /// The ambient token fired mid-execution.
    Cancelled(CoreError),
    /// Ordinary failure; recorded as an error observation.
    Failed(String),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suspend(req) => write!(f, "suspended on requirement {}", req.id),
            Self::ReplayMismatch { call_id } => {
                write!(f, "replay fingerprint mismatch for call {call_id}")
            }
            Self::Cancelled(e) => write!(f, "{e}"),
            Self::Failed(msg) => f.write_str(msg),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One named tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn invoke(
        &self,
        cancel: &CancelToken,
        call: &ToolCall,
        env: &ExecEnv,
    ) -> Result<String, ToolError>;
}

/// What the engine sees: a catalogue plus a dispatcher.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    fn catalogue(&self) -> Vec<ToolDefinition>;

    async fn execute(
        &self,
        cancel: &CancelToken,
        call: &ToolCall,
        env: &ExecEnv,
    ) -> Result<String, ToolError>;
}

#[cfg(test)]
pub(crate) fn test_env() -> ExecEnv {
    ExecEnv::new(
        PathBuf::from("/workspace"),
        Duration::from_secs(30),
        Arc::new(RegexSet::new([r"^\s*rm\s", r"^\s*sudo\s"]).unwrap()),
    )
}
