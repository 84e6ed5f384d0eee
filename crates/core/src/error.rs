//! Error taxonomy shared across the engine.
//!
//! Four families matter operationally: validation and state-conflict
//! errors are terminal for the request; collaborator failures are
//! transient and safe to retry on the next natural sample; write
//! conflicts are retried by the store before being reported.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input, rejected before touching any aggregate.
    #[error("validation error: {0}")]
    Validation(String),

    /// Action attempted against a session not in the required state.
    /// The reason string is shown verbatim to the proctor/admin UI.
    #[error("{0}")]
    StateConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// External collaborator (inference service) failed or timed out.
    /// No state was mutated; the next sampled frame retries naturally.
    #[error("collaborator failure: {0}")]
    Collaborator(String),

    /// Optimistic write rejected: the aggregate changed under us.
    #[error("concurrent write conflict")]
    Conflict,

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn state_conflict(msg: impl Into<String>) -> Self {
        EngineError::StateConflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Transient errors are worth retrying; terminal ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Collaborator(_) | EngineError::Conflict)
    }
}
