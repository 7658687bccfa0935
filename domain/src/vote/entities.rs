//! Vote and vote-session entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single scored vote from one agent.
///
/// The `stage_version` records the meeting stage the vote was produced at;
/// a vote whose stage no longer matches the meeting's at persistence time is
/// stale and must be dropped, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub meeting_id: String,
    pub vote_session_id: String,
    pub voter_agent_id: String,
    /// 0..=100.
    pub score: u8,
    pub pass: bool,
    pub rationale: Option<String>,
    pub stage_version: u64,
    pub created_at: DateTime<Utc>,
}

/// What a vote session is deciding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    /// Scored vote over the concatenated round proposal.
    Proposal,
    /// Unanimity review of a final result document draft.
    Approval,
}

/// Lifecycle of a vote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteSessionStatus {
    #[serde(rename = "RUNNING")]
    Running,
    /// Evaluation completed at the session's stage version.
    #[serde(rename = "FINALIZED")]
    Finalized,
    /// A user interrupt lifted the stage version mid-session.
    #[serde(rename = "ABORTED")]
    Aborted,
    /// A final-document attempt failed unanimity.
    #[serde(rename = "INCOMPLETE")]
    Incomplete,
}

/// A bounded set of vote calls over one proposal text at one stage version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteSession {
    pub id: String,
    pub meeting_id: String,
    pub round: u32,
    pub stage_version: u64,
    pub kind: VoteKind,
    /// 1-based attempt counter for approval sessions.
    pub attempt: Option<u32>,
    /// The draft being voted on.
    pub proposal_text: String,
    pub status: VoteSessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub expected_voter_agent_ids: Vec<String>,
}

impl VoteSession {
    pub fn proposal(
        meeting_id: impl Into<String>,
        round: u32,
        stage_version: u64,
        proposal_text: impl Into<String>,
        expected_voter_agent_ids: Vec<String>,
    ) -> Self {
        Self {
            id: String::new(),
            meeting_id: meeting_id.into(),
            round,
            stage_version,
            kind: VoteKind::Proposal,
            attempt: None,
            proposal_text: proposal_text.into(),
            status: VoteSessionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            expected_voter_agent_ids,
        }
    }

    pub fn approval(
        meeting_id: impl Into<String>,
        round: u32,
        stage_version: u64,
        draft: impl Into<String>,
        expected_voter_agent_ids: Vec<String>,
        attempt: u32,
    ) -> Self {
        Self {
            kind: VoteKind::Approval,
            attempt: Some(attempt),
            ..Self::proposal(meeting_id, round, stage_version, draft, expected_voter_agent_ids)
        }
    }
}

/// Aggregation over the votes that actually landed in a session.
///
/// Averages are integer-rounded; voters whose calls never produced a
/// persisted vote are simply excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteAggregate {
    pub count: usize,
    pub avg_score: Option<u32>,
    pub min_score: Option<u8>,
    pub max_score: Option<u8>,
}

impl VoteAggregate {
    pub fn from_votes(votes: &[Vote]) -> Self {
        if votes.is_empty() {
            return Self {
                count: 0,
                avg_score: None,
                min_score: None,
                max_score: None,
            };
        }
        let sum: u32 = votes.iter().map(|v| v.score as u32).sum();
        let avg = (sum as f64 / votes.len() as f64).round() as u32;
        Self {
            count: votes.len(),
            avg_score: Some(avg),
            min_score: votes.iter().map(|v| v.score).min(),
            max_score: votes.iter().map(|v| v.score).max(),
        }
    }
}

/// Whether every expected voter produced a persisted `pass=true` vote.
///
/// This is strict unanimity over the expected set: a voter that never
/// answered counts against approval.
pub fn unanimous_approval(expected_voter_agent_ids: &[String], votes: &[Vote]) -> bool {
    !expected_voter_agent_ids.is_empty()
        && expected_voter_agent_ids.iter().all(|id| {
            votes
                .iter()
                .any(|v| v.voter_agent_id == *id && v.pass)
        })
}
