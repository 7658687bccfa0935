//! LLM Gateway port
//!
//! One operation: turn a chat-shaped request into a whole completion.
//! Providers are heterogeneous behind this seam; the orchestrator only ever
//! sees text. Errors are classified so callers can decide between retrying
//! against the built-in mock provider and failing the call outright.

use async_trait::async_trait;
use conclave_domain::TokenUsage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Role of a chat message sent to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A chat message in provider-neutral shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Completion shape requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask the provider for a single JSON object.
    JsonObject,
}

/// One text-generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Gateway provider key; `"auto"` routes by model-id prefix.
    pub provider_id: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Enforced by the gateway; the call also observes the caller's
    /// cancellation token, whichever fires first.
    pub timeout_ms: u64,
    pub response_format: ResponseFormat,
    pub metadata: Option<serde_json::Value>,
}

/// A whole completion.
#[derive(Debug, Clone)]
pub struct GenerateReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
    /// Provider-side request id, when one was reported.
    pub request_id: Option<String>,
}

impl GenerateReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            request_id: None,
        }
    }
}

/// Errors from gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream returned status {status}: {detail}")]
    UpstreamStatus { status: u16, detail: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Whether a retry (against the same provider or the mock fallback)
    /// could plausibly succeed. Auth and validation failures are final;
    /// transient upstream conditions, malformed bodies, rate limits,
    /// transport resets and timeouts are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            GatewayError::RateLimited(_)
            | GatewayError::MalformedResponse(_)
            | GatewayError::Transport(_)
            | GatewayError::Timeout => true,
            GatewayError::UpstreamStatus { status, .. } => {
                matches!(status, 408 | 409 | 425 | 429) || *status >= 500
            }
            GatewayError::UnknownProvider(_)
            | GatewayError::Auth(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::Cancelled => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }
}

/// Gateway for unified text generation over heterogeneous providers.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Generate a whole completion. Must enforce `request.timeout_ms`,
    /// observe `cancel` at suspension points and reject unknown providers.
    async fn generate_text(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateReply, GatewayError>;
}
