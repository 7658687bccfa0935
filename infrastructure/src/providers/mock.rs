//! Deterministic mock provider.
//!
//! The mock is both a test double and the salvage target for the per-call
//! fallback path, so it must always answer and always answer the same way
//! for the same prompt. The response style is derived from the model id
//! suffix; the prompt shape (vote contract, facilitator schema, editor
//! outline) picks the response family.

use super::ProviderAdapter;
use async_trait::async_trait;
use conclave_application::ports::llm_gateway::{
    ChatRole, GatewayError, GenerateReply, GenerateRequest,
};
use conclave_domain::TokenUsage;
use tokio_util::sync::CancellationToken;

/// Registry key of the built-in mock provider.
pub const MOCK_PROVIDER_KEY: &str = "mock";

/// Response style, from the model id suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockStyle {
    /// Score 75, passes. `mock-default` and `mock-neutral`.
    Neutral,
    /// Score 90, passes.
    Optimist,
    /// Score 70, fails.
    Skeptic,
    /// Answers votes with prose instead of JSON.
    BrokenJson,
}

impl MockStyle {
    fn from_model(model: &str) -> Self {
        match model {
            "mock-optimist" => MockStyle::Optimist,
            "mock-skeptic" => MockStyle::Skeptic,
            "mock-broken-json" => MockStyle::BrokenJson,
            _ => MockStyle::Neutral,
        }
    }

    fn ballot(&self) -> String {
        match self {
            MockStyle::Optimist => {
                r#"{"score": 90, "pass": true, "rationale": "Strong, actionable plan"}"#.to_string()
            }
            MockStyle::Skeptic => {
                r#"{"score": 70, "pass": false, "rationale": "Unresolved risks remain"}"#
                    .to_string()
            }
            MockStyle::BrokenJson => "I would rate this somewhere around acceptable.".to_string(),
            MockStyle::Neutral => {
                r#"{"score": 75, "pass": true, "rationale": "Workable with caveats"}"#.to_string()
            }
        }
    }

    fn stance(&self) -> &'static str {
        match self {
            MockStyle::Optimist => "This direction is strong; I would commit to it now",
            MockStyle::Skeptic => "I see real risks here that need mitigation first",
            MockStyle::BrokenJson => "There are several angles worth considering",
            MockStyle::Neutral => "This is workable if we sequence it carefully",
        }
    }
}

/// Built-in deterministic provider.
#[derive(Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }

    fn system_of(request: &GenerateRequest) -> &str {
        request
            .messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    fn user_of(request: &GenerateRequest) -> &str {
        request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Stable tag derived from the prompt, so distinct prompts get
    /// distinguishable (but reproducible) completions.
    fn prompt_tag(user: &str) -> u32 {
        user.bytes().fold(0u32, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(b as u32)
        }) % 1000
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn key(&self) -> &str {
        MOCK_PROVIDER_KEY
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateReply, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let style = MockStyle::from_model(&request.model);
        let system = Self::system_of(request);
        let user = Self::user_of(request);

        let text = if system.contains("casting a vote")
            || system.contains("reviewing the final result document")
        {
            style.ballot()
        } else if system.contains("meeting facilitator") {
            match style {
                MockStyle::BrokenJson => "The round went fine, broadly speaking.".to_string(),
                _ => r#"{"round_summary": "Participants are converging on a plan.", "disagreements": ["Rollout pace"], "proposed_patch": "Add an explicit canary stage before full rollout.", "next_focus": ["Define rollback criteria"]}"#.to_string(),
            }
        } else if system.contains("final result document") {
            format!(
                "# Decision\nProceed with the discussed plan.\n\n\
                 # Scope & Assumptions\nScope as discussed in the meeting.\n\n\
                 # Key Evidence & Trade-offs\nSummarized from the transcript.\n\n\
                 # Agreed Plan\nExecute in phases with checkpoints.\n\n\
                 # Action Items\n| Item | Owner |\n|---|---|\n| Kick off phase one | team |\n\n\
                 # Risks & Mitigations\nTracked per phase.\n\n\
                 # Open Questions\nNone blocking.\n\n\
                 # Acceptance Criteria\nPhase goals met. (rev {})",
                Self::prompt_tag(user)
            )
        } else {
            format!("{} (ref {}).", style.stance(), Self::prompt_tag(user))
        };

        let completion_tokens = (text.len() / 4) as u32;
        Ok(GenerateReply {
            text,
            usage: Some(TokenUsage {
                prompt_tokens: (user.len() / 4) as u32,
                completion_tokens,
                total_tokens: (user.len() / 4) as u32 + completion_tokens,
            }),
            request_id: None,
        })
    }
}
