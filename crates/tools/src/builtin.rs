//! Built-in utility tools: `echo` and `time.now`.
//!
//! `echo` is also what the scripted planner's `[loop]` behavior invokes,
//! so it stays dependency-free and always succeeds.

use chrono::Utc;

use rg_domain::cancel::CancelToken;
use rg_domain::message::{ToolCall, ToolDefinition};

use crate::{ExecEnv, Tool, ToolError};

pub struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Echo the given text back.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                },
                "required": ["text"]
            }),
        }
    }

    async fn invoke(
        &self,
        cancel: &CancelToken,
        call: &ToolCall,
        _env: &ExecEnv,
    ) -> Result<String, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled(cancel.err()));
        }
        Ok(call.arg_str("text").unwrap_or_default().to_owned())
    }
}

pub struct TimeTool;

#[async_trait::async_trait]
impl Tool for TimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "time.now".into(),
            description: "Current UTC time in RFC 3339 format.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    async fn invoke(
        &self,
        cancel: &CancelToken,
        _call: &ToolCall,
        _env: &ExecEnv,
    ) -> Result<String, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled(cancel.err()));
        }
        Ok(Utc::now().to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env;

    #[tokio::test]
    async fn echo_returns_text() {
        let call = ToolCall::new("c1", "echo").with_arg("text", serde_json::json!("tick"));
        let out = EchoTool
            .invoke(&CancelToken::new(), &call, &test_env())
            .await
            .unwrap();
        assert_eq!(out, "tick");
    }

    #[tokio::test]
    async fn echo_without_text_is_empty() {
        let out = EchoTool
            .invoke(&CancelToken::new(), &ToolCall::new("c1", "echo"), &test_env())
            .await
            .unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn time_now_is_rfc3339() {
        let out = TimeTool
            .invoke(&CancelToken::new(), &ToolCall::new("c1", "time.now"), &test_env())
            .await
            .unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&out).is_ok());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancelToken::new();
        cancel.cancel("stop");
        let err = EchoTool
            .invoke(&cancel, &ToolCall::new("c1", "echo"), &test_env())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled(_)));
    }
}
