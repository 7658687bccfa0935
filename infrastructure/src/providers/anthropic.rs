//! Anthropic messages-API adapter.

use super::{ProviderAdapter, bounded, classify_http_failure, classify_transport_failure};
use async_trait::async_trait;
use conclave_application::ports::llm_gateway::{
    ChatRole, GatewayError, GenerateReply, GenerateRequest,
};
use conclave_domain::TokenUsage;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct WireContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct WireResponse {
    id: Option<String>,
    content: Vec<WireContentBlock>,
    usage: Option<WireUsage>,
}

/// Adapter for the Anthropic messages API.
///
/// The system prompt travels in the top-level `system` field; only user and
/// assistant turns go into `messages`. There is no JSON response mode; the
/// vote contract in the prompt is the whole contract.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(&self, request: &GenerateRequest) -> Result<GenerateReply, GatewayError> {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str());
        let messages: Vec<WireMessage<'_>> = request
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| WireMessage {
                role: match m.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
                },
                content: &m.content,
            })
            .collect();

        let body = WireRequest {
            model: &request.model,
            system,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(GatewayError::MalformedResponse(
                "message carried no text blocks".to_string(),
            ));
        }

        Ok(GenerateReply {
            text: content,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
            request_id: parsed.id,
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn key(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateReply, GatewayError> {
        bounded(request.timeout_ms, &cancel, self.call(request)).await
    }
}
