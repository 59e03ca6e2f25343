//! Bash tool — `sh -c` execution behind the approval policy gate.
//!
//! A command matching any configured approval pattern raises a suspend
//! request instead of executing. The replay token installed by an
//! approved resolution bypasses the gate for exactly one matching
//! `(call_id, fingerprint)` pair; a token for the same call id with a
//! different fingerprint is a hard error.

use std::process::Stdio;

use tokio::process::Command;

use rg_domain::cancel::CancelToken;
use rg_domain::message::{ToolCall, ToolDefinition};
use rg_domain::run::PendingRequirement;

use crate::fingerprint::approval_fingerprint;
use crate::{ExecEnv, Tool, ToolError};

pub struct BashTool;

pub const TOOL_NAME: &str = "bash";

#[async_trait::async_trait]
impl Tool for BashTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_NAME.into(),
            description: "Run a shell command in the workspace. Gated commands require approval."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute" }
                },
                "required": ["command"]
            }),
        }
    }

    async fn invoke(
        &self,
        cancel: &CancelToken,
        call: &ToolCall,
        env: &ExecEnv,
    ) -> Result<String, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled(cancel.err()));
        }

        let command = call
            .arg_str("command")
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::Failed("bash: missing 'command' argument".into()))?;

        let fingerprint = approval_fingerprint(
            TOOL_NAME,
            &call.id,
            command,
            &env.workspace_root,
            env.bash_timeout.as_secs(),
        );

        // Replay token for this exact call id: fingerprints must agree.
        let bypass = match &env.replay {
            Some(token) if token.tool_call_id == call.id => {
                if token.fingerprint != fingerprint {
                    return Err(ToolError::ReplayMismatch {
                        call_id: call.id.clone(),
                    });
                }
                true
            }
            _ => false,
        };

        if !bypass && env.approval_patterns.is_match(command) {
            tracing::info!(call_id = %call.id, %command, "bash command gated for approval");
            return Err(ToolError::Suspend(PendingRequirement::tool_approval(
                call.id.clone(),
                fingerprint,
                format!("approve bash command: {command}"),
            )));
        }

        run_command(cancel, command, env).await
    }
}

async fn run_command(
    cancel: &CancelToken,
    command: &str,
    env: &ExecEnv,
) -> Result<String, ToolError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(&env.workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output_fut = cmd.output();
    let output = tokio::select! {
        out = tokio::time::timeout(env.bash_timeout, output_fut) => match out {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolError::Failed(format!("spawn failed: {e}"))),
            Err(_) => {
                return Err(ToolError::Failed(format!(
                    "command timed out after {}s",
                    env.bash_timeout.as_secs()
                )))
            }
        },
        _ = cancel.cancelled() => return Err(ToolError::Cancelled(cancel.err())),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        Ok(stdout.into_owned())
    } else {
        Err(ToolError::Failed(format!(
            "exit {}: {}",
            output.status.code().unwrap_or(-1),
            if stderr.is_empty() { &stdout } else { &stderr }
        )))
    }
}
