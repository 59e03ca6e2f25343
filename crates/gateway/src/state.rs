use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rg_domain::config::Config;
use rg_engine::{Runner, StreamBroker};

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Command dispatch (per-run locks, dedup, engine).
    pub runner: Arc<Runner>,
    /// Cursor-resumable event history; readers bypass the runner locks.
    pub broker: Arc<StreamBroker>,
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Arc<Vec<u8>>>,
    /// Flipped once startup finishes; `/readyz` reports it.
    pub ready: Arc<AtomicBool>,
}
