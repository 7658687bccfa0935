//! Cross-reply target selection.

use crate::message::{Message, MessageRole, ReplyTarget};
use crate::meeting::validation::QUOTE_MAX_CHARS;

/// Pick the agents a speaker must address this round.
///
/// Scans the transcript newest-first, keeping the most recent agent message
/// from each distinct other speaker, and stops once `cap` targets are
/// collected. The blind round passes an empty transcript and gets no
/// targets.
pub fn select_reply_targets(messages: &[Message], speaker_id: &str, cap: usize) -> Vec<ReplyTarget> {
    let mut targets: Vec<ReplyTarget> = Vec::new();
    if cap == 0 {
        return targets;
    }

    for message in messages.iter().rev() {
        if message.role != MessageRole::Agent {
            continue;
        }
        let Some(author) = message.agent_id.as_deref() else {
            continue;
        };
        if author == speaker_id {
            continue;
        }
        if targets.iter().any(|t| t.agent_id == author) {
            continue;
        }
        targets.push(ReplyTarget::new(
            author,
            Some(crate::util::truncate_str(&message.content, QUOTE_MAX_CHARS)),
        ));
        if targets.len() >= cap {
            break;
        }
    }

    targets
}
