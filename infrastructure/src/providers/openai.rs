//! OpenAI chat-completions adapter.

use super::{ProviderAdapter, bounded, classify_http_failure, classify_transport_failure};
use async_trait::async_trait;
use conclave_application::ports::llm_gateway::{
    ChatMessage, ChatRole, GatewayError, GenerateReply, GenerateRequest, ResponseFormat,
};
use conclave_domain::TokenUsage;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct WireResponse {
    id: Option<String>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

/// Adapter for OpenAI-compatible chat-completion endpoints.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Point the adapter at a compatible endpoint (proxies, self-hosted).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn wire_role(role: ChatRole) -> &'static str {
        match role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    async fn call(&self, request: &GenerateRequest) -> Result<GenerateReply, GatewayError> {
        let body = WireRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m: &ChatMessage| WireMessage {
                    role: Self::wire_role(m.role),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: match request.response_format {
                ResponseFormat::JsonObject => Some(serde_json::json!({"type": "json_object"})),
                ResponseFormat::Text => None,
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_failure)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(classify_transport_failure)?;
        if !(200..300).contains(&status) {
            return Err(classify_http_failure(status, &text));
        }

        let parsed: WireResponse = serde_json::from_str(&text)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                GatewayError::MalformedResponse("completion carried no content".to_string())
            })?;

        Ok(GenerateReply {
            text: content,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            request_id: parsed.id,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn key(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateReply, GatewayError> {
        bounded(request.timeout_ms, &cancel, self.call(request)).await
    }
}
