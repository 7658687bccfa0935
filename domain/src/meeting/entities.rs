//! Meeting entity and state machine.

use super::config::{EffectiveDiscussionMode, MeetingConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a meeting.
///
/// Transitions are restricted to the orchestrator's state machine; use
/// [`MeetingState::can_transition_to`] to check legality before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeetingState {
    #[serde(rename = "DRAFT")]
    Draft,
    #[serde(rename = "RUNNING_DISCUSSION")]
    RunningDiscussion,
    #[serde(rename = "RUNNING_VOTE")]
    RunningVote,
    #[serde(rename = "FINISHED_ACCEPTED")]
    FinishedAccepted,
    #[serde(rename = "FINISHED_ABORTED")]
    FinishedAborted,
}

impl MeetingState {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MeetingState::FinishedAccepted | MeetingState::FinishedAborted)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Any non-terminal state may abort. Acceptance is only reachable from
    /// the vote stage.
    pub fn can_transition_to(&self, next: MeetingState) -> bool {
        use MeetingState::*;
        match (self, next) {
            (_, _) if self.is_terminal() => false,
            (_, FinishedAborted) => true,
            (Draft, RunningDiscussion) => true,
            (RunningDiscussion, RunningVote) => true,
            (RunningVote, RunningDiscussion) => true,
            (RunningVote, FinishedAccepted) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for MeetingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MeetingState::Draft => "DRAFT",
            MeetingState::RunningDiscussion => "RUNNING_DISCUSSION",
            MeetingState::RunningVote => "RUNNING_VOTE",
            MeetingState::FinishedAccepted => "FINISHED_ACCEPTED",
            MeetingState::FinishedAborted => "FINISHED_ABORTED",
        };
        write!(f, "{}", s)
    }
}

/// Terminal outcome written exactly once, when the meeting finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingResult {
    pub accepted: bool,
    /// Human-readable reason ("accepted", "Max rounds reached", ...).
    pub reason: String,
    pub concluded_at: DateTime<Utc>,
    /// Rendered markdown report, when the output config asks for one.
    pub report_markdown: Option<String>,
    /// Structured summary: counts, final document, per-reviewer approvals.
    pub summary: serde_json::Value,
}

/// A meeting: one topic, a frozen config and the orchestrator's mutable
/// state-machine fields.
///
/// `stage_version` is the optimistic-concurrency token: it only ever grows,
/// and every durable write produced by a concurrent phase re-reads the
/// meeting and drops itself on mismatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub topic: String,
    pub state: MeetingState,
    /// Round currently being (or about to be) run; 0 is the blind round.
    pub round: u32,
    pub stage_version: u64,
    /// Resolved at start, never changed afterwards.
    pub effective_discussion_mode: Option<EffectiveDiscussionMode>,
    pub active_vote_session_id: Option<String>,
    pub result: Option<MeetingResult>,
    pub config: MeetingConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    /// Create a fresh draft meeting. Ids are allocated by the store.
    pub fn draft(topic: impl Into<String>, config: MeetingConfig) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            topic: topic.into(),
            state: MeetingState::Draft,
            round: 0,
            stage_version: 0,
            effective_discussion_mode: None,
            active_vote_session_id: None,
            result: None,
            config,
            created_at: now,
            updated_at: now,
        }
    }
}
