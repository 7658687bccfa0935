//! Final report rendering.
//!
//! Builds the terminal `result` artifacts: a human-readable markdown report
//! and a structured summary carrying counts, the final document and the
//! per-reviewer approval set. Both are pure functions of their inputs.

use crate::meeting::entities::Meeting;
use crate::message::{Message, MessageRole};
use crate::vote::entities::Vote;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One reviewer's verdict on the final result document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub agent_id: String,
    pub score: u8,
    pub pass: bool,
    pub rationale: Option<String>,
}

impl ApprovalRecord {
    pub fn from_vote(vote: &Vote) -> Self {
        Self {
            agent_id: vote.voter_agent_id.clone(),
            score: vote.score,
            pass: vote.pass,
            rationale: vote.rationale.clone(),
        }
    }
}

/// Everything the report builder needs, borrowed from the orchestrator.
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub meeting: &'a Meeting,
    pub messages: &'a [Message],
    pub votes: &'a [Vote],
    /// Latest final result document draft, approved or not.
    pub final_document: Option<&'a str>,
    pub approvals: &'a [ApprovalRecord],
    pub accepted: bool,
    pub reason: &'a str,
    pub concluded_at: DateTime<Utc>,
}

impl ReportContext<'_> {
    fn agent_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Agent)
            .count()
    }

    fn rounds_run(&self) -> u32 {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Agent)
            .map(|m| m.meta.round + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Render the markdown report for a finished meeting.
pub fn render_markdown(ctx: &ReportContext<'_>) -> String {
    let verdict = if ctx.accepted { "Accepted" } else { "Aborted" };
    let mut out = format!(
        "# Meeting report: {}\n\n\
         - Outcome: **{}** — {}\n\
         - Concluded: {}\n\
         - Rounds run: {}\n\
         - Agent messages: {}\n\
         - Votes cast: {}\n",
        ctx.meeting.topic,
        verdict,
        ctx.reason,
        ctx.concluded_at.to_rfc3339(),
        ctx.rounds_run(),
        ctx.agent_message_count(),
        ctx.votes.len(),
    );

    if let Some(document) = ctx.final_document {
        out.push_str("\n## Final result document\n\n");
        out.push_str(document);
        out.push('\n');
    }

    if !ctx.approvals.is_empty() {
        out.push_str("\n## Approvals\n\n| Agent | Score | Pass | Rationale |\n|---|---|---|---|\n");
        for approval in ctx.approvals {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                approval.agent_id,
                approval.score,
                if approval.pass { "yes" } else { "no" },
                approval.rationale.as_deref().unwrap_or("-"),
            ));
        }
    }

    let proposal_votes: Vec<&Vote> = ctx.votes.iter().collect();
    if !proposal_votes.is_empty() {
        out.push_str("\n## Vote history\n\n| Session | Agent | Score | Pass |\n|---|---|---|---|\n");
        for vote in proposal_votes {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                vote.vote_session_id,
                vote.voter_agent_id,
                vote.score,
                if vote.pass { "yes" } else { "no" },
            ));
        }
    }

    out
}

/// Build the structured summary persisted alongside the report.
pub fn summary_json(ctx: &ReportContext<'_>) -> Value {
    json!({
        "accepted": ctx.accepted,
        "reason": ctx.reason,
        "concluded_at": ctx.concluded_at.to_rfc3339(),
        "rounds_run": ctx.rounds_run(),
        "message_count": ctx.messages.len(),
        "agent_message_count": ctx.agent_message_count(),
        "vote_count": ctx.votes.len(),
        "final_document": ctx.final_document,
        "approvals": ctx.approvals,
    })
}
