//! Tool registry — builds the catalogue for the planner and dispatches
//! calls by name.

use std::collections::HashMap;
use std::sync::Arc;

use rg_domain::cancel::CancelToken;
use rg_domain::message::{ToolCall, ToolDefinition};

use crate::bash::BashTool;
use crate::builtin::{EchoTool, TimeTool};
use crate::{ExecEnv, Tool, ToolError, ToolExecutor};

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Catalogue order is stable regardless of map iteration order.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// The standard set: bash, echo, time.now.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BashTool));
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(TimeTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for ToolRegistry {
    fn catalogue(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    async fn execute(
        &self,
        cancel: &CancelToken,
        call: &ToolCall,
        env: &ExecEnv,
    ) -> Result<String, ToolError> {
        match self.tools.get(&call.name) {
            Some(tool) => tool.invoke(cancel, call, env).await,
            None => Err(ToolError::Failed(format!("unknown tool: {}", call.name))),
        }
    }
}
