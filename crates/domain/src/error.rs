//! The closed error taxonomy shared across all RunGate crates.
//!
//! Every failure the core can surface is one of these variants; callers
//! match on the variant (never on message text) and the HTTP layer maps
//! [`CoreError::code`] to the wire envelope.

/// Shared error type used across all RunGate crates.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    // ── Validation ────────────────────────────────────────────────────
    #[error("invalid run id: {0:?}")]
    InvalidRunId(String),

    #[error("invalid command: {0}")]
    CommandInvalid(String),

    #[error("resolution does not match the pending requirement: {0}")]
    ResolutionInvalid(String),

    #[error("resolution supplied but no requirement is pending")]
    ResolutionUnexpected,

    #[error("invalid event: {0}")]
    EventInvalid(String),

    // ── Gating ────────────────────────────────────────────────────────
    #[error("a resolution is required to continue this run")]
    ResolutionRequired,

    #[error("run {0} is not continuable from its current status")]
    RunNotContinuable(String),

    #[error("run {0} is not cancellable")]
    RunNotCancellable(String),

    // ── Concurrency ───────────────────────────────────────────────────
    #[error("run {0} already exists")]
    CommandConflict(String),

    #[error("version conflict saving run {run_id}: attempted {attempted}, stored {stored}")]
    RunVersionConflict {
        run_id: String,
        attempted: u64,
        stored: u64,
    },

    // ── Stream ────────────────────────────────────────────────────────
    #[error("cursor {0} is invalid for this stream")]
    CursorInvalid(i64),

    #[error("cursor {0} points before the retained history")]
    CursorExpired(i64),

    // ── Lifecycle outcomes (accepted, not failures) ───────────────────
    #[error("run reached its step limit")]
    MaxStepsExceeded,

    #[error("run suspended awaiting a resolution")]
    RunSuspended,

    // ── Approval replay ───────────────────────────────────────────────
    #[error("approved replay mismatch for call {call_id}: fingerprint differs")]
    BashReplayMismatch { call_id: String },

    // ── Not-found ─────────────────────────────────────────────────────
    #[error("run {0} not found")]
    RunNotFound(String),

    // ── Internal guards ───────────────────────────────────────────────
    #[error("illegal run state transition: {0}")]
    RunStateInvalid(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("planner: {0}")]
    Planner(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Stable wire code for the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRunId(_)
            | Self::CommandInvalid(_)
            | Self::ResolutionInvalid(_)
            | Self::ResolutionUnexpected
            | Self::EventInvalid(_) => "invalid_request",
            Self::ResolutionRequired
            | Self::RunNotContinuable(_)
            | Self::RunNotCancellable(_) => "forbidden",
            Self::CommandConflict(_)
            | Self::RunVersionConflict { .. }
            | Self::CursorInvalid(_)
            | Self::CursorExpired(_) => "conflict",
            Self::RunNotFound(_) => "not_found",
            Self::Cancelled(_) => "policy_rejected",
            Self::MaxStepsExceeded
            | Self::RunSuspended
            | Self::BashReplayMismatch { .. }
            | Self::RunStateInvalid(_)
            | Self::Planner(_)
            | Self::Other(_) => "runtime_error",
        }
    }

    /// Lifecycle outcomes are carried as errors through the engine but are
    /// *accepted* results: the run state itself conveys what happened.
    pub fn is_lifecycle_outcome(&self) -> bool {
        matches!(self, Self::MaxStepsExceeded | Self::RunSuspended)
    }
}
