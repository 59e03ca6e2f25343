//! Shared domain types for RunGate: run lifecycle primitives, transcript
//! model, event schema, error taxonomy, cancellation, and configuration.
//!
//! Everything here is transport-agnostic — the engine, planner adapters,
//! tool executors, and the HTTP gateway all build on these types.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod run;

pub use cancel::CancelToken;
pub use error::{CoreError, Result};
