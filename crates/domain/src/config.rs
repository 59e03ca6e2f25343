//! Configuration model — loaded from `config.toml`, every field defaulted
//! so an empty file (or no file) yields a working dev setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Env var holding the API bearer token. Unset/empty = dev mode
    /// (no auth enforced, logged once at startup).
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "d_max_body")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            api_token_env: d_token_env(),
            request_timeout_secs: d_request_timeout(),
            max_body_bytes: d_max_body(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default step budget per engine invocation when a command does not
    /// carry `max_steps`.
    #[serde(default = "d_max_steps")]
    pub max_steps: u64,
    /// Frames retained per run by the stream broker.
    #[serde(default = "d_history_limit")]
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: d_max_steps(),
            history_limit: d_history_limit(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Planner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerMode {
    /// Deterministic prompt-keyed planner (tests, dev).
    Scripted,
    /// OpenAI-compatible chat-completions endpoint.
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "d_planner_mode")]
    pub mode: PlannerMode,
    #[serde(default = "d_planner_base_url")]
    pub base_url: String,
    #[serde(default = "d_planner_model")]
    pub model: String,
    /// Env var holding the planner API key.
    #[serde(default = "d_planner_key_env")]
    pub api_key_env: String,
    /// Per-call timeout for planner requests.
    #[serde(default = "d_planner_timeout")]
    pub timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            mode: d_planner_mode(),
            base_url: d_planner_base_url(),
            model: d_planner_model(),
            api_key_env: d_planner_key_env(),
            timeout_secs: d_planner_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "d_workspace_root")]
    pub workspace_root: PathBuf,
    /// Hard timeout for one bash invocation.
    #[serde(default = "d_bash_timeout")]
    pub bash_timeout_secs: u64,
    /// Commands matching any of these regexes require human approval.
    #[serde(default = "d_approval_patterns")]
    pub approval_patterns: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_root: d_workspace_root(),
            bash_timeout_secs: d_bash_timeout(),
            approval_patterns: d_approval_patterns(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| crate::error::CoreError::Other(format!("config parse: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(crate::error::CoreError::Other(format!("config read: {e}"))),
        }
    }

    /// Sanity checks surfaced at startup.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.engine.max_steps == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "engine.max_steps must be at least 1".into(),
            });
        }
        if self.engine.history_limit == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "engine.history_limit must be at least 1".into(),
            });
        }
        for pattern in &self.tools.approval_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: format!("tools.approval_patterns: invalid regex {pattern:?}: {e}"),
                });
            }
        }
        if self.planner.mode == PlannerMode::Openai && self.planner.base_url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "planner.base_url is required in openai mode".into(),
            });
        }
        if self.server.request_timeout_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "server.request_timeout_secs = 0 disables request deadlines".into(),
            });
        }
        issues
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    7410
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_token_env() -> String {
    "RG_API_TOKEN".into()
}
fn d_request_timeout() -> u64 {
    30
}
fn d_max_body() -> usize {
    1024 * 1024
}
fn d_max_steps() -> u64 {
    8
}
fn d_history_limit() -> usize {
    32
}
fn d_planner_mode() -> PlannerMode {
    PlannerMode::Scripted
}
fn d_planner_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_planner_model() -> String {
    "gpt-4o-mini".into()
}
fn d_planner_key_env() -> String {
    "RG_PLANNER_KEY".into()
}
fn d_planner_timeout() -> u64 {
    60
}
fn d_workspace_root() -> PathBuf {
    PathBuf::from(".")
}
fn d_bash_timeout() -> u64 {
    30
}
fn d_approval_patterns() -> Vec<String> {
    vec![
        r"^\s*rm\s".into(),
        r"^\s*sudo\s".into(),
        r"^\s*chmod\s".into(),
        r"\bmkfs\b".into(),
        r"\bdd\s+if=".into(),
    ]
}
