//! Prompt construction
//!
//! Everything here is pure: the same context always produces byte-identical
//! prompts, which keeps the discussion/vote/facilitator flows reproducible
//! under test.

mod builder;
mod reply_targets;

pub use builder::{
    BuiltPrompt, DiscussionContext, FINAL_DOCUMENT_SECTIONS, PromptBuilder, build_proposal_text,
};
pub use reply_targets::select_reply_targets;
