//! Discussion messages
//!
//! Messages are immutable append-only records. The store allocates ids; the
//! constructors here leave `id` empty and cap content at the persistence
//! limit.

use crate::meeting::config::EffectiveDiscussionMode;
use crate::meeting::validation::{MESSAGE_MAX_CHARS, QUOTE_MAX_CHARS};
use crate::util::truncate_str;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

/// Which internal component authored a `system` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemSender {
    Facilitator,
    Orchestrator,
}

/// A cross-reference a speaker was asked to address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub agent_id: String,
    /// Short excerpt of the target's message, capped at the quote limit.
    pub quote: Option<String>,
}

impl ReplyTarget {
    pub fn new(agent_id: impl Into<String>, quote: Option<&str>) -> Self {
        Self {
            agent_id: agent_id.into(),
            quote: quote.map(|q| truncate_str(q, QUOTE_MAX_CHARS).to_string()),
        }
    }
}

/// Token accounting reported by a provider, when available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Per-message metadata: round placement, scheduling, cross-references and
/// provenance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageMeta {
    pub round: u32,
    /// Position within a parallel round, for stable ordering.
    pub turn_index: Option<usize>,
    pub discussion_mode: Option<EffectiveDiscussionMode>,
    #[serde(default)]
    pub reply_targets: Vec<ReplyTarget>,
    pub token_usage: Option<TokenUsage>,
    pub latency_ms: Option<u64>,
    /// Records fallback provenance, e.g. "fallback:openai->mock".
    pub provider_request_id: Option<String>,
}

impl MessageMeta {
    pub fn for_round(round: u32) -> Self {
        Self {
            round,
            ..Default::default()
        }
    }
}

/// One immutable message in a meeting's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub meeting_id: String,
    pub created_at: DateTime<Utc>,
    pub role: MessageRole,
    /// Set when `role == Agent`.
    pub agent_id: Option<String>,
    /// Set when `role == System`.
    pub system_sender: Option<SystemSender>,
    pub content: String,
    pub meta: MessageMeta,
}

impl Message {
    fn base(meeting_id: impl Into<String>, content: impl Into<String>, meta: MessageMeta) -> Self {
        let content = content.into();
        let content = truncate_str(&content, MESSAGE_MAX_CHARS).to_string();
        Self {
            id: String::new(),
            meeting_id: meeting_id.into(),
            created_at: Utc::now(),
            role: MessageRole::User,
            agent_id: None,
            system_sender: None,
            content,
            meta,
        }
    }

    pub fn user(meeting_id: impl Into<String>, content: impl Into<String>, round: u32) -> Self {
        Self {
            role: MessageRole::User,
            ..Self::base(meeting_id, content, MessageMeta::for_round(round))
        }
    }

    pub fn agent(
        meeting_id: impl Into<String>,
        agent_id: impl Into<String>,
        content: impl Into<String>,
        meta: MessageMeta,
    ) -> Self {
        Self {
            role: MessageRole::Agent,
            agent_id: Some(agent_id.into()),
            ..Self::base(meeting_id, content, meta)
        }
    }

    pub fn system(
        meeting_id: impl Into<String>,
        sender: SystemSender,
        content: impl Into<String>,
        round: u32,
    ) -> Self {
        Self {
            role: MessageRole::System,
            system_sender: Some(sender),
            ..Self::base(meeting_id, content, MessageMeta::for_round(round))
        }
    }

    /// Label used when quoting this message in prompts and reports.
    pub fn speaker_label(&self) -> &str {
        match self.role {
            MessageRole::User => "user",
            MessageRole::Agent => self.agent_id.as_deref().unwrap_or("agent"),
            MessageRole::System => match self.system_sender {
                Some(SystemSender::Facilitator) => "facilitator",
                _ => "orchestrator",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_message_carries_agent_id() {
        let meta = MessageMeta::for_round(1);
        let msg = Message::agent("mtg-1", "alice", "I propose a phased rollout.", meta);
        assert_eq!(msg.role, MessageRole::Agent);
        assert_eq!(msg.agent_id.as_deref(), Some("alice"));
        assert_eq!(msg.speaker_label(), "alice");
        assert_eq!(msg.meta.round, 1);
    }

    #[test]
    fn system_message_carries_sender() {
        let msg = Message::system("mtg-1", SystemSender::Facilitator, "## Round summary", 2);
        assert_eq!(msg.role, MessageRole::System);
        assert_eq!(msg.speaker_label(), "facilitator");
    }

    #[test]
    fn content_is_capped_at_persistence_limit() {
        let huge = "x".repeat(MESSAGE_MAX_CHARS + 100);
        let msg = Message::user("mtg-1", huge, 0);
        assert_eq!(msg.content.len(), MESSAGE_MAX_CHARS);
    }

    #[test]
    fn reply_target_quote_is_capped() {
        let quote = "q".repeat(500);
        let target = ReplyTarget::new("bob", Some(quote.as_str()));
        assert_eq!(target.quote.as_ref().map(String::len), Some(QUOTE_MAX_CHARS));
    }
}
