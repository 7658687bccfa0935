//! Boundary validation for topics and meeting configuration.
//!
//! Validation runs before a meeting is created; a rejected config never
//! produces a meeting row.

use super::config::MeetingConfig;
use std::collections::HashSet;
use thiserror::Error;

/// Minimum number of configured agents.
pub const MIN_AGENTS: usize = 3;
/// Maximum number of configured agents.
pub const MAX_AGENTS: usize = 8;
/// Maximum topic length in characters.
pub const TOPIC_MAX_CHARS: usize = 2_000;
/// Maximum persisted message content length in characters.
pub const MESSAGE_MAX_CHARS: usize = 50_000;
/// Maximum quote length carried by a reply target.
pub const QUOTE_MAX_CHARS: usize = 200;

/// Structured rejection reasons for meeting creation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("topic exceeds {TOPIC_MAX_CHARS} characters (got {0})")]
    TopicTooLong(usize),

    #[error("meeting needs between {MIN_AGENTS} and {MAX_AGENTS} agents (got {0})")]
    AgentCountOutOfRange(usize),

    #[error("agent id must not be empty")]
    EmptyAgentId,

    #[error("duplicate agent id: {0}")]
    DuplicateAgentId(String),

    #[error("agent {agent_id}: temperature {value} outside [0, 2]")]
    TemperatureOutOfRange { agent_id: String, value: f32 },

    #[error("agent {agent_id}: max_output_tokens {value} outside [64, 16384]")]
    MaxOutputTokensOutOfRange { agent_id: String, value: u32 },

    #[error("max_rounds ({max_rounds}) must be >= min_rounds ({min_rounds})")]
    RoundBoundsInverted { min_rounds: u32, max_rounds: u32 },
}

/// Validate a user-supplied topic.
pub fn validate_topic(topic: &str) -> Result<(), ConfigValidationError> {
    let trimmed = topic.trim();
    if trimmed.is_empty() {
        return Err(ConfigValidationError::EmptyTopic);
    }
    let chars = topic.chars().count();
    if chars > TOPIC_MAX_CHARS {
        return Err(ConfigValidationError::TopicTooLong(chars));
    }
    Ok(())
}

/// Validate a meeting configuration against the creation-time bounds.
pub fn validate_config(config: &MeetingConfig) -> Result<(), ConfigValidationError> {
    let count = config.agents.len();
    if !(MIN_AGENTS..=MAX_AGENTS).contains(&count) {
        return Err(ConfigValidationError::AgentCountOutOfRange(count));
    }

    let mut seen = HashSet::new();
    for agent in &config.agents {
        if agent.id.trim().is_empty() {
            return Err(ConfigValidationError::EmptyAgentId);
        }
        if !seen.insert(agent.id.as_str()) {
            return Err(ConfigValidationError::DuplicateAgentId(agent.id.clone()));
        }
        if !(0.0..=2.0).contains(&agent.temperature) {
            return Err(ConfigValidationError::TemperatureOutOfRange {
                agent_id: agent.id.clone(),
                value: agent.temperature,
            });
        }
        if !(64..=16_384).contains(&agent.max_output_tokens) {
            return Err(ConfigValidationError::MaxOutputTokensOutOfRange {
                agent_id: agent.id.clone(),
                value: agent.max_output_tokens,
            });
        }
    }

    let t = &config.threshold;
    if t.max_rounds < t.min_rounds {
        return Err(ConfigValidationError::RoundBoundsInverted {
            min_rounds: t.min_rounds,
            max_rounds: t.max_rounds,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meeting::config::{
        AgentConfig, DiscussionConfig, FacilitatorConfig, OutputFormat, ThresholdConfig,
    };

    fn agent(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            display_name: format!("Agent {}", id),
            provider: "mock".to_string(),
            model: "mock-default".to_string(),
            system_prompt: "You are a participant.".to_string(),
            temperature: 0.7,
            max_output_tokens: 512,
            enabled: true,
        }
    }

    fn config_with(agents: Vec<AgentConfig>) -> MeetingConfig {
        MeetingConfig {
            agents,
            discussion: DiscussionConfig::default(),
            facilitator: FacilitatorConfig::default(),
            threshold: ThresholdConfig::default(),
            output: OutputFormat::default(),
        }
    }

    #[test]
    fn accepts_three_to_eight_agents() {
        assert!(validate_config(&config_with(vec![agent("a"), agent("b"), agent("c")])).is_ok());

        let eight: Vec<_> = (0..8).map(|i| agent(&format!("a{}", i))).collect();
        assert!(validate_config(&config_with(eight)).is_ok());
    }

    #[test]
    fn rejects_too_few_or_too_many_agents() {
        let two = config_with(vec![agent("a"), agent("b")]);
        assert_eq!(
            validate_config(&two),
            Err(ConfigValidationError::AgentCountOutOfRange(2))
        );

        let nine: Vec<_> = (0..9).map(|i| agent(&format!("a{}", i))).collect();
        assert!(matches!(
            validate_config(&config_with(nine)),
            Err(ConfigValidationError::AgentCountOutOfRange(9))
        ));
    }

    #[test]
    fn rejects_duplicate_agent_ids() {
        let cfg = config_with(vec![agent("a"), agent("a"), agent("b")]);
        assert_eq!(
            validate_config(&cfg),
            Err(ConfigValidationError::DuplicateAgentId("a".to_string()))
        );
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut cfg = config_with(vec![agent("a"), agent("b"), agent("c")]);
        cfg.agents[1].temperature = 2.5;
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigValidationError::TemperatureOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_token_budget() {
        let mut cfg = config_with(vec![agent("a"), agent("b"), agent("c")]);
        cfg.agents[0].max_output_tokens = 32;
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigValidationError::MaxOutputTokensOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_inverted_round_bounds() {
        let mut cfg = config_with(vec![agent("a"), agent("b"), agent("c")]);
        cfg.threshold.min_rounds = 5;
        cfg.threshold.max_rounds = 2;
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigValidationError::RoundBoundsInverted { .. })
        ));
    }

    #[test]
    fn topic_bounds() {
        assert!(validate_topic("Rollout plan").is_ok());
        assert_eq!(validate_topic("   "), Err(ConfigValidationError::EmptyTopic));
        let long = "x".repeat(TOPIC_MAX_CHARS + 1);
        assert!(matches!(
            validate_topic(&long),
            Err(ConfigValidationError::TopicTooLong(_))
        ));
    }
}
