//! Raw TOML configuration data types.
//!
//! These structs mirror the config file exactly; they are deserialized as
//! written and then converted into domain types, where validation happens.

use conclave_domain::{
    AgentConfig, DiscussionConfig, FacilitatorConfig, MeetingConfig, OutputFormat, ThresholdConfig,
};
use serde::{Deserialize, Serialize};

/// One agent as written in the config file. Everything except `id` has a
/// usable default so a minimal file stays minimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAgentConfig {
    pub id: String,
    pub display_name: Option<String>,
    pub provider: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub enabled: bool,
}

impl Default for FileAgentConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            display_name: None,
            provider: "mock".to_string(),
            model: "mock-default".to_string(),
            system_prompt: None,
            temperature: 0.7,
            max_output_tokens: 1_024,
            enabled: true,
        }
    }
}

impl FileAgentConfig {
    fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            id: self.id.clone(),
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| self.id.clone()),
            provider: self.provider.clone(),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone().unwrap_or_else(|| {
                format!(
                    "You are {}, a thoughtful participant in a structured meeting.",
                    self.display_name.as_deref().unwrap_or(&self.id)
                )
            }),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            enabled: self.enabled,
        }
    }
}

/// Credentials and endpoint for one upstream provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProviderCredentials {
    /// Inline key; prefer `api_key_env` in checked-in files.
    pub api_key: Option<String>,
    /// Name of the environment variable holding the key.
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
}

impl FileProviderCredentials {
    /// Resolve the API key, preferring the inline value.
    pub fn resolve_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        self.api_key_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }
}

/// Upstream provider credentials, keyed by adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProvidersConfig {
    pub openai: Option<FileProviderCredentials>,
    pub anthropic: Option<FileProviderCredentials>,
    pub gemini: Option<FileProviderCredentials>,
}

/// The whole config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Default topic; a CLI flag overrides it.
    pub topic: Option<String>,
    pub agents: Vec<FileAgentConfig>,
    pub discussion: DiscussionConfig,
    pub facilitator: FacilitatorConfig,
    pub threshold: ThresholdConfig,
    pub output: OutputFormat,
    pub providers: FileProvidersConfig,
}

impl FileConfig {
    /// Convert into the domain config handed to meeting creation (which
    /// validates it).
    pub fn meeting_config(&self) -> MeetingConfig {
        MeetingConfig {
            agents: self.agents.iter().map(FileAgentConfig::to_agent_config).collect(),
            discussion: self.discussion.clone(),
            facilitator: self.facilitator.clone(),
            threshold: self.threshold.clone(),
            output: self.output,
        }
    }
}
