//! Domain layer for conclave
//!
//! This crate contains the meeting entities, vote primitives and pure
//! decision logic. It has no dependencies on infrastructure or runtime
//! concerns.

pub mod event;
pub mod facilitator;
pub mod meeting;
pub mod message;
pub mod prompt;
pub mod report;
pub mod threshold;
pub mod util;
pub mod vote;

// Re-export commonly used types
pub use event::{ErrorCode, EventKind, MeetingEvent};
pub use facilitator::FacilitatorOutput;
pub use meeting::{
    config::{
        AgentConfig, DiscussionConfig, DiscussionMode, EffectiveDiscussionMode, FacilitatorConfig,
        MeetingConfig, OutputFormat, ThresholdConfig, ThresholdMode,
    },
    entities::{Meeting, MeetingResult, MeetingState},
    validation::{ConfigValidationError, validate_config, validate_topic},
};
pub use message::{Message, MessageMeta, MessageRole, ReplyTarget, SystemSender, TokenUsage};
pub use prompt::{
    BuiltPrompt, DiscussionContext, PromptBuilder, build_proposal_text, select_reply_targets,
};
pub use report::{ApprovalRecord, ReportContext};
pub use threshold::ThresholdDecision;
pub use vote::{
    entities::{Vote, VoteAggregate, VoteKind, VoteSession, VoteSessionStatus, unanimous_approval},
    parsing::{VoteBallot, parse_vote_response},
};
