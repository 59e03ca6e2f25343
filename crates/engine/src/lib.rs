//! The run lifecycle engine: store contract, event broker, react loop,
//! and the command runner.
//!
//! Entry point for callers is [`Runner`] — one instance owns the per-run
//! serialization, command dedup, resolution gating, and event emission
//! around command boundaries. The HTTP gateway is a thin mapping onto it.

pub mod broker;
pub mod cancel_map;
pub mod locks;
pub mod react;
pub mod runner;
pub mod store;

pub use broker::{EventSink, FanoutSink, StreamBroker, TracingSink};
pub use react::{run_engine, EngineInput, EngineServices};
pub use runner::{ContinueInput, FollowUpInput, Runner, RunnerConfig, StartInput};
pub use store::{MemoryRunStore, RunStore};
