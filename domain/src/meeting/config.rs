//! Meeting configuration
//!
//! A [`MeetingConfig`] is frozen onto the meeting at creation time and never
//! rewritten afterwards. Defaults follow the shipped behavior: auto mode
//! resolution, a 2-round minimum before voting, an average-score threshold
//! of 80 and markdown output.

use serde::{Deserialize, Serialize};

/// Configured discussion scheduling, before resolution at meeting start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionMode {
    /// Pick serial or parallel from the enabled-agent count.
    #[default]
    Auto,
    /// One agent speaks at a time, each seeing the previous speaker's message.
    SerialTurn,
    /// All agents speak concurrently against a shared snapshot.
    ParallelRound,
}

/// Scheduling actually used by a running meeting, resolved once at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveDiscussionMode {
    SerialTurn,
    ParallelRound,
}

impl DiscussionMode {
    /// Resolve `auto` against the enabled-agent count. Explicit modes pass
    /// through unchanged.
    pub fn resolve(&self, enabled_agents: usize, auto_parallel_min: usize) -> EffectiveDiscussionMode {
        match self {
            DiscussionMode::SerialTurn => EffectiveDiscussionMode::SerialTurn,
            DiscussionMode::ParallelRound => EffectiveDiscussionMode::ParallelRound,
            DiscussionMode::Auto => {
                if enabled_agents >= auto_parallel_min {
                    EffectiveDiscussionMode::ParallelRound
                } else {
                    EffectiveDiscussionMode::SerialTurn
                }
            }
        }
    }
}

impl std::fmt::Display for EffectiveDiscussionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EffectiveDiscussionMode::SerialTurn => write!(f, "serial_turn"),
            EffectiveDiscussionMode::ParallelRound => write!(f, "parallel_round"),
        }
    }
}

/// One configured LLM participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique within the meeting.
    pub id: String,
    pub display_name: String,
    /// Opaque gateway provider key (e.g. "openai", "mock", "auto").
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_true() -> bool {
    true
}

/// Discussion scheduling and context-compression knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionConfig {
    #[serde(default)]
    pub mode: DiscussionMode,
    /// `auto` resolves to parallel at or above this many enabled agents.
    #[serde(default = "default_auto_parallel_min_agents")]
    pub auto_parallel_min_agents: usize,
    /// How many other agents each speaker must address per round.
    #[serde(default = "default_cross_reply_targets")]
    pub cross_reply_targets_per_agent: usize,
    /// Whether the latest facilitator summary is injected into prompts.
    #[serde(default = "default_true")]
    pub rolling_summary_enabled: bool,
    /// Byte cap applied to the rolling summary inside prompts.
    #[serde(default = "default_rolling_summary_max_chars")]
    pub rolling_summary_max_chars: usize,
}

fn default_auto_parallel_min_agents() -> usize {
    6
}

fn default_cross_reply_targets() -> usize {
    2
}

fn default_rolling_summary_max_chars() -> usize {
    2000
}

impl Default for DiscussionConfig {
    fn default() -> Self {
        Self {
            mode: DiscussionMode::Auto,
            auto_parallel_min_agents: default_auto_parallel_min_agents(),
            cross_reply_targets_per_agent: default_cross_reply_targets(),
            rolling_summary_enabled: true,
            rolling_summary_max_chars: default_rolling_summary_max_chars(),
        }
    }
}

/// Facilitator pass configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilitatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Provider override; falls back to the first enabled agent's provider.
    #[serde(default)]
    pub provider: Option<String>,
    /// Model override; falls back to the first enabled agent's model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_facilitator_temperature")]
    pub temperature: f32,
    #[serde(default = "default_facilitator_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_facilitator_temperature() -> f32 {
    0.2
}

fn default_facilitator_timeout_ms() -> u64 {
    90_000
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: None,
            model: None,
            temperature: default_facilitator_temperature(),
            timeout_ms: default_facilitator_timeout_ms(),
        }
    }
}

/// Accept-rule selection for the vote stage.
///
/// Unknown modes deserialize to [`ThresholdMode::Unknown`] and always reject,
/// so a config written for a newer build degrades to "never accept" rather
/// than failing open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    #[default]
    AvgScore,
    #[serde(other)]
    Unknown,
}

/// Vote threshold and round bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub mode: ThresholdMode,
    /// Accept when the rounded average score reaches this value.
    #[serde(default = "default_avg_score_threshold")]
    pub avg_score_threshold: u32,
    /// No vote stage before this round.
    #[serde(default = "default_min_rounds")]
    pub min_rounds: u32,
    /// Meeting aborts once the round counter exceeds this value.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Floor for per-call vote timeouts; discussion calls also respect it.
    #[serde(default = "default_vote_timeout_ms")]
    pub vote_timeout_ms: u64,
}

fn default_avg_score_threshold() -> u32 {
    80
}

fn default_min_rounds() -> u32 {
    2
}

fn default_max_rounds() -> u32 {
    8
}

fn default_vote_timeout_ms() -> u64 {
    20_000
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            mode: ThresholdMode::AvgScore,
            avg_score_threshold: default_avg_score_threshold(),
            min_rounds: default_min_rounds(),
            max_rounds: default_max_rounds(),
            vote_timeout_ms: default_vote_timeout_ms(),
        }
    }
}

/// Result artifact format(s) to render at the end of the meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
    Both,
}

impl OutputFormat {
    pub fn wants_markdown(&self) -> bool {
        matches!(self, OutputFormat::Markdown | OutputFormat::Both)
    }

    pub fn wants_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }
}

/// Full meeting configuration, frozen at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingConfig {
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub discussion: DiscussionConfig,
    #[serde(default)]
    pub facilitator: FacilitatorConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub output: OutputFormat,
}

impl MeetingConfig {
    /// Agents participating in rounds and votes, in config order.
    pub fn enabled_agents(&self) -> Vec<&AgentConfig> {
        self.agents.iter().filter(|a| a.enabled).collect()
    }

    /// Ids of enabled agents, in config order.
    pub fn enabled_agent_ids(&self) -> Vec<String> {
        self.enabled_agents().iter().map(|a| a.id.clone()).collect()
    }

    /// Provider/model the facilitator (and final-document editor) should
    /// use: the configured override, falling back to the first enabled
    /// agent. `None` when no agent is enabled.
    pub fn facilitator_provider_model(&self) -> Option<(String, String)> {
        let first = self.enabled_agents().into_iter().next()?;
        Some((
            self.facilitator
                .provider
                .clone()
                .unwrap_or_else(|| first.provider.clone()),
            self.facilitator
                .model
                .clone()
                .unwrap_or_else(|| first.model.clone()),
        ))
    }
}
