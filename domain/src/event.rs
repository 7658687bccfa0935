//! Meeting events
//!
//! Events are appended to the store (monotone per-process ids) before they
//! are fanned out to live subscribers, so a consumer holding a cursor can
//! always backfill a gap-free prefix.

use crate::facilitator::FacilitatorOutput;
use crate::meeting::entities::MeetingState;
use crate::message::Message;
use crate::vote::entities::{Vote, VoteKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error codes carried by `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "AGENT_ERROR")]
    AgentError,
    #[serde(rename = "RUNNER_ERROR")]
    RunnerError,
    #[serde(rename = "DISCUSSION_EMPTY_SKIP_VOTE")]
    DiscussionEmptySkipVote,
}

/// Typed event payloads, tagged with their wire names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    #[serde(rename = "meeting.state_changed")]
    StateChanged {
        state: MeetingState,
        round: u32,
        stage_version: u64,
    },

    #[serde(rename = "message.final")]
    MessageFinal { message: Message },

    #[serde(rename = "facilitator.output")]
    FacilitatorOutput {
        stage_version: u64,
        round: u32,
        output: FacilitatorOutput,
    },

    #[serde(rename = "vote.session_started")]
    VoteSessionStarted {
        vote_session_id: String,
        stage_version: u64,
        kind: VoteKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
    },

    #[serde(rename = "vote.received")]
    VoteReceived { vote: Vote, kind: VoteKind },

    #[serde(rename = "vote.session_final")]
    VoteSessionFinal {
        vote_session_id: String,
        stage_version: u64,
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        avg_score: Option<u32>,
        reason: String,
        kind: VoteKind,
    },

    #[serde(rename = "error")]
    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

/// A stored event with its allocated id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingEvent {
    /// Monotone per-process counter, allocated by the store.
    pub id: u64,
    pub meeting_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}
