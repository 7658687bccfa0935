//! Store port
//!
//! Persistence plus per-meeting mutual exclusion and the event log. The
//! store allocates all ids, including the monotone per-process event ids
//! that drive `Last-Event-ID` style replay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conclave_domain::{
    EffectiveDiscussionMode, EventKind, Meeting, MeetingConfig, MeetingEvent, MeetingResult,
    MeetingState, Message, Vote, VoteSession, VoteSessionStatus,
};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

/// Errors from store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

/// RAII guard for a per-meeting lock.
///
/// Fairness and reentrancy are not promised; holders must not suspend on
/// gateway calls while the guard is live.
pub struct MeetingLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl MeetingLockGuard {
    pub fn new(guard: OwnedMutexGuard<()>) -> Self {
        Self { _guard: guard }
    }
}

/// Restricted update applied to a meeting.
///
/// Only the orchestrator-owned fields are patchable; everything else is
/// frozen at creation. Applying the same patch twice is equivalent to
/// applying it once.
#[derive(Debug, Clone, Default)]
pub struct MeetingPatch {
    pub state: Option<MeetingState>,
    pub round: Option<u32>,
    pub stage_version: Option<u64>,
    pub effective_discussion_mode: Option<EffectiveDiscussionMode>,
    /// `Some(None)` clears the active session.
    pub active_vote_session_id: Option<Option<String>>,
    pub result: Option<MeetingResult>,
}

impl MeetingPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: MeetingState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn stage_version(mut self, stage_version: u64) -> Self {
        self.stage_version = Some(stage_version);
        self
    }

    pub fn effective_discussion_mode(mut self, mode: EffectiveDiscussionMode) -> Self {
        self.effective_discussion_mode = Some(mode);
        self
    }

    pub fn active_vote_session(mut self, id: Option<String>) -> Self {
        self.active_vote_session_id = Some(id);
        self
    }

    pub fn result(mut self, result: MeetingResult) -> Self {
        self.result = Some(result);
        self
    }
}

/// Message listing window.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub meeting_id: String,
    pub limit: Option<usize>,
    pub after_message_id: Option<String>,
}

impl MessageQuery {
    pub fn all(meeting_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            ..Default::default()
        }
    }
}

/// Vote listing window.
#[derive(Debug, Clone, Default)]
pub struct VoteQuery {
    pub meeting_id: String,
    pub vote_session_id: Option<String>,
}

impl VoteQuery {
    pub fn all(meeting_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            vote_session_id: None,
        }
    }

    pub fn session(meeting_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            vote_session_id: Some(session_id.into()),
        }
    }
}

/// Event replay window: events with `id > after`, oldest first.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub meeting_id: String,
    pub after: Option<u64>,
    pub limit: Option<usize>,
}

/// Persistence, per-meeting mutual exclusion and the event log.
#[async_trait]
pub trait Store: Send + Sync {
    /// Acquire the per-meeting lock. All state transitions, vote-session
    /// lifecycle changes and interrupt handling run under this guard.
    async fn lock_meeting(&self, meeting_id: &str) -> Result<MeetingLockGuard, StoreError>;

    /// Create a meeting in DRAFT at stage version 0, round 0.
    async fn create_meeting(
        &self,
        topic: String,
        config: MeetingConfig,
    ) -> Result<Meeting, StoreError>;

    async fn get_meeting(&self, meeting_id: &str) -> Result<Meeting, StoreError>;

    /// Newest first, optionally starting after an id cursor.
    async fn list_meetings(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<Vec<Meeting>, StoreError>;

    async fn update_meeting(
        &self,
        meeting_id: &str,
        patch: MeetingPatch,
    ) -> Result<Meeting, StoreError>;

    /// Atomic append; the store allocates the message id.
    async fn append_message(&self, message: Message) -> Result<Message, StoreError>;

    async fn list_messages(&self, query: MessageQuery) -> Result<Vec<Message>, StoreError>;

    async fn create_vote_session(&self, session: VoteSession) -> Result<VoteSession, StoreError>;

    async fn get_vote_session(
        &self,
        meeting_id: &str,
        session_id: &str,
    ) -> Result<VoteSession, StoreError>;

    async fn finalize_vote_session(
        &self,
        meeting_id: &str,
        session_id: &str,
        status: VoteSessionStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<VoteSession, StoreError>;

    async fn append_vote(&self, vote: Vote) -> Result<Vote, StoreError>;

    async fn list_votes(&self, query: VoteQuery) -> Result<Vec<Vote>, StoreError>;

    /// Append an event, allocating the next monotone id.
    async fn append_event(
        &self,
        meeting_id: &str,
        kind: EventKind,
    ) -> Result<MeetingEvent, StoreError>;

    async fn list_events(&self, query: EventQuery) -> Result<Vec<MeetingEvent>, StoreError>;
}
