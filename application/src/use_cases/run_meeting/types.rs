//! Orchestrator-internal types.

use crate::ports::store::StoreError;
use thiserror::Error;

/// Errors that can stop a meeting run.
///
/// Gateway failures never appear here: agent-scoped failures are degraded
/// to `error` events and the round continues.
#[derive(Error, Debug)]
pub enum RunMeetingError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Meeting is in an unexpected state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl RunMeetingError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunMeetingError::Cancelled)
    }
}

/// Result of one discussion round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoundOutcome {
    /// Round ran to completion; carries the number of agent messages that
    /// actually landed.
    Completed { agent_messages: usize },
    /// The stage version moved while agents were speaking; every result was
    /// dropped and the main loop should re-read the meeting.
    Invalidated,
}
