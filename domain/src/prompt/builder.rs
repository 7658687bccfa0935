//! Prompt templates for discussion, voting, facilitation and the final
//! result document.

use crate::message::{Message, MessageRole, ReplyTarget};
use crate::util::{truncate_marked, truncate_str};

/// How many transcript messages a discussion prompt carries.
const RECENT_MESSAGE_WINDOW: usize = 10;
/// Per-message content cap inside the transcript block.
const RECENT_MESSAGE_CHAR_CAP: usize = 800;
/// Per-message cap when joining a round into a proposal text.
const PROPOSAL_MESSAGE_CHAR_CAP: usize = 1_200;
/// Base proposal cap inside the final-document editor prompt.
const FINAL_DOC_PROPOSAL_CAP: usize = 5 * 1024;
/// Recent-discussion cap inside the final-document editor prompt.
const FINAL_DOC_DISCUSSION_CAP: usize = 7 * 1024;
/// Per-objection cap in a revision prompt.
const OBJECTION_CHAR_CAP: usize = 400;
/// Maximum number of objections carried into a revision prompt.
const OBJECTION_LIMIT: usize = 12;

/// Section outline every final result document must follow.
pub const FINAL_DOCUMENT_SECTIONS: [&str; 8] = [
    "Decision",
    "Scope & Assumptions",
    "Key Evidence & Trade-offs",
    "Agreed Plan",
    "Action Items",
    "Risks & Mitigations",
    "Open Questions",
    "Acceptance Criteria",
];

/// A system/user prompt pair ready for a gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub system: String,
    pub user: String,
}

/// Inputs for one agent's discussion turn.
#[derive(Debug, Clone)]
pub struct DiscussionContext<'a> {
    pub topic: &'a str,
    pub round: u32,
    pub agent_system_prompt: &'a str,
    /// Latest facilitator summary, if any.
    pub rolling_summary: Option<&'a str>,
    pub rolling_summary_max_chars: usize,
    /// Full transcript so far; the builder windows it.
    pub transcript: &'a [Message],
    /// User messages from this and prior rounds.
    pub user_messages: &'a [Message],
    pub reply_targets: &'a [ReplyTarget],
}

/// Templates for every prompt the orchestrator issues.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Discussion prompt. Round 0 is blind: an empty transcript and no
    /// reply targets leave only the topic and the instruction block.
    pub fn discussion(ctx: &DiscussionContext<'_>) -> BuiltPrompt {
        let mut user = format!("Topic: {}\nRound: {}\n", ctx.topic, ctx.round);

        if let Some(summary) = ctx.rolling_summary {
            user.push_str("\nRolling summary of the discussion so far:\n");
            user.push_str(truncate_str(summary, ctx.rolling_summary_max_chars));
            user.push('\n');
        }

        let recent: Vec<&Message> = ctx
            .transcript
            .iter()
            .rev()
            .take(RECENT_MESSAGE_WINDOW)
            .collect();
        if !recent.is_empty() {
            user.push_str("\nRecent messages (newest last):\n");
            for message in recent.iter().rev() {
                user.push_str(&format!(
                    "[{}] {}\n",
                    message.speaker_label(),
                    truncate_str(&message.content, RECENT_MESSAGE_CHAR_CAP)
                ));
            }
        }

        let steering: Vec<&Message> = ctx
            .user_messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .collect();
        if !steering.is_empty() {
            user.push_str("\nUser guidance:\n");
            for message in &steering {
                user.push_str(&format!("- {}\n", message.content));
            }
        }

        if !ctx.reply_targets.is_empty() {
            user.push_str("\nYou MUST respond to:\n");
            for target in ctx.reply_targets {
                match &target.quote {
                    Some(quote) => {
                        user.push_str(&format!("- {}: \"{}\"\n", target.agent_id, quote))
                    }
                    None => user.push_str(&format!("- {}\n", target.agent_id)),
                }
            }
        }

        user.push_str(
            "\nInstructions: Make 1-3 core points. Keep each point concrete. \
             If you disagree with another participant, you must propose an \
             alternative rather than only objecting.\n",
        );

        BuiltPrompt {
            system: ctx.agent_system_prompt.to_string(),
            user,
        }
    }

    /// Scored vote over a proposal. The JSON contract is appended to the
    /// agent's own system prompt.
    pub fn vote(
        agent_system_prompt: &str,
        topic: &str,
        rolling_summary: Option<&str>,
        proposal_text: &str,
    ) -> BuiltPrompt {
        let system = format!(
            "{}\n\nYou are casting a vote. Respond ONLY with a JSON object of \
             the form {{\"score\": <integer 0-100>, \"pass\": <true|false>, \
             \"rationale\": \"<short reasoning>\"}}. No other text.",
            agent_system_prompt
        );

        let mut user = format!("Topic: {}\n", topic);
        if let Some(summary) = rolling_summary {
            user.push_str(&format!("\nRolling summary:\n{}\n", summary));
        }
        user.push_str(&format!(
            "\nProposal under vote:\n{}\n\nScore the proposal and decide whether it should pass.",
            proposal_text
        ));

        BuiltPrompt { system, user }
    }

    /// Unanimity review of a final result document draft. Same JSON
    /// contract as [`PromptBuilder::vote`].
    pub fn approval(agent_system_prompt: &str, topic: &str, draft: &str) -> BuiltPrompt {
        let system = format!(
            "{}\n\nYou are reviewing the final result document for this \
             meeting. Approve only if you can stand behind every section. \
             Respond ONLY with a JSON object of the form {{\"score\": \
             <integer 0-100>, \"pass\": <true|false>, \"rationale\": \
             \"<short reasoning>\"}}. No other text.",
            agent_system_prompt
        );

        let user = format!(
            "Topic: {}\n\nFinal result document draft:\n{}\n\nDoes this \
             document accurately capture the discussion's conclusion?",
            topic, draft
        );

        BuiltPrompt { system, user }
    }

    /// Facilitator pass over the round that just finished.
    pub fn facilitator(
        topic: &str,
        summarized_round: u32,
        rolling_summary: Option<&str>,
        recent_messages: &[Message],
        proposal_draft: &str,
    ) -> BuiltPrompt {
        let system = "You are the meeting facilitator. You summarize, surface \
                      disagreements and propose the next focus. You never vote. \
                      Respond ONLY with a JSON object of the form \
                      {\"round_summary\": \"<=2000 chars\", \"disagreements\": \
                      [\"1-3 items\"], \"proposed_patch\": \"<=4000 chars\", \
                      \"next_focus\": [\"1-2 items\"]}. No other text."
            .to_string();

        let mut user = format!("Topic: {}\nRound just completed: {}\n", topic, summarized_round);
        if let Some(summary) = rolling_summary {
            user.push_str(&format!("\nPrevious rolling summary:\n{}\n", summary));
        }
        if !recent_messages.is_empty() {
            user.push_str("\nMessages from the round:\n");
            for message in recent_messages {
                user.push_str(&format!(
                    "[{}] {}\n",
                    message.speaker_label(),
                    truncate_str(&message.content, RECENT_MESSAGE_CHAR_CAP)
                ));
            }
        }
        user.push_str(&format!("\nCurrent proposal draft:\n{}\n", proposal_draft));

        BuiltPrompt { system, user }
    }

    /// First draft of the final result document.
    pub fn final_document(topic: &str, proposal: &str, recent_discussion: &str) -> BuiltPrompt {
        let system = "You are the editor producing the meeting's final result \
                      document. Write clean markdown. Use exactly these \
                      top-level sections, in order: Decision, Scope & \
                      Assumptions, Key Evidence & Trade-offs, Agreed Plan, \
                      Action Items (as a table), Risks & Mitigations, Open \
                      Questions, Acceptance Criteria."
            .to_string();

        let user = format!(
            "Topic: {}\n\nAccepted proposal:\n{}\n\nRecent discussion:\n{}\n\n\
             Produce the final result document now.",
            topic,
            truncate_str(proposal, FINAL_DOC_PROPOSAL_CAP),
            truncate_str(recent_discussion, FINAL_DOC_DISCUSSION_CAP),
        );

        BuiltPrompt { system, user }
    }

    /// Revision pass after a failed unanimity attempt.
    pub fn final_document_revision(
        topic: &str,
        current_draft: &str,
        objections: &[String],
    ) -> BuiltPrompt {
        let system = "You are the editor revising the meeting's final result \
                      document to satisfy reviewer objections. Keep the same \
                      section outline. Change only what the objections require."
            .to_string();

        let mut user = format!(
            "Topic: {}\n\nCurrent draft:\n{}\n\nReviewer objections:\n",
            topic, current_draft
        );
        for objection in objections.iter().take(OBJECTION_LIMIT) {
            user.push_str(&format!("- {}\n", truncate_marked(objection, OBJECTION_CHAR_CAP)));
        }
        user.push_str("\nRevise the document so every objection is addressed.");

        BuiltPrompt { system, user }
    }
}

/// Join the latest round's agent messages into the proposal put to a vote.
///
/// Each message is prefixed with its agent id and individually capped, so
/// one verbose agent cannot crowd out the others.
pub fn build_proposal_text(round_messages: &[&Message]) -> String {
    let mut proposal = String::new();
    for message in round_messages {
        if message.role != MessageRole::Agent {
            continue;
        }
        proposal.push_str(&format!(
            "[{}] {}\n\n",
            message.speaker_label(),
            truncate_str(&message.content, PROPOSAL_MESSAGE_CHAR_CAP)
        ));
    }
    proposal.trim_end().to_string()
}
