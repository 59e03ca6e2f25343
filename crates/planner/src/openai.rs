//! OpenAI-compatible chat-completions planner adapter (non-streaming).
//!
//! Translates the internal transcript/tool-catalogue model to the
//! chat-completions wire format and back. Works against any endpoint
//! speaking that dialect; the base URL, model, and key env var come from
//! `[planner]` config.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use rg_domain::cancel::CancelToken;
use rg_domain::error::{CoreError, Result};
use rg_domain::message::{Message, Role, ToolCall};

use crate::{Planner, PlannerReply, PlannerRequest};

pub struct OpenAiPlanner {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiPlanner {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object, per the chat-completions contract.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn to_wire_message(msg: &Message) -> WireMessage {
    match msg.role {
        Role::System | Role::User | Role::Assistant => WireMessage {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                _ => "assistant",
            }
            .into(),
            content: Some(msg.content.clone()),
            tool_calls: if msg.tool_calls.is_empty() {
                None
            } else {
                Some(msg.tool_calls.iter().map(to_wire_call).collect())
            },
            tool_call_id: None,
        },
        Role::Tool => WireMessage {
            role: "tool".into(),
            content: Some(msg.content.clone()),
            tool_calls: None,
            tool_call_id: msg.tool_call_id.clone(),
        },
    }
}

fn to_wire_call(call: &ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        call_type: "function".into(),
        function: WireFunctionCall {
            name: call.name.clone(),
            arguments: serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".into()),
        },
    }
}

fn from_wire_call(call: WireToolCall) -> ToolCall {
    let arguments = serde_json::from_str::<Value>(&call.function.arguments)
        .ok()
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();
    ToolCall {
        id: call.id,
        name: call.function.name,
        arguments,
    }
}

fn build_wire_request(model: &str, req: &PlannerRequest) -> WireRequest {
    let mut messages: Vec<WireMessage> = req.messages.iter().map(to_wire_message).collect();

    // A remote planner learns about the resolution through the transcript.
    if let Some(resolution) = &req.resolution {
        messages.push(WireMessage {
            role: "user".into(),
            content: Some(resolution.marker()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    WireRequest {
        model: model.to_owned(),
        messages,
        tools: req
            .tools
            .iter()
            .map(|t| WireTool {
                tool_type: "function".into(),
                function: WireFunctionDef {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect(),
    }
}

#[async_trait::async_trait]
impl Planner for OpenAiPlanner {
    async fn plan(&self, cancel: &CancelToken, req: PlannerRequest) -> Result<PlannerReply> {
        cancel.check()?;

        let wire = build_wire_request(&self.model, &req);
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            model = %self.model,
            messages = wire.messages.len(),
            tools = wire.tools.len(),
            "chat completion request"
        );

        let request = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&wire)
            .send();

        let response = tokio::select! {
            r = request => r.map_err(|e| CoreError::Planner(format!("request: {e}")))?,
            _ = cancel.cancelled() => return Err(cancel.err()),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Planner(format!(
                "chat completion failed: {status}: {body}"
            )));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Planner(format!("decode: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Planner("response carried no choices".into()))?;

        Ok(PlannerReply {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(from_wire_call)
                .collect(),
            requirement: None,
        })
    }

    fn planner_id(&self) -> &str {
        "openai"
    }
}
