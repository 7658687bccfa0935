//! Google Gemini generateContent adapter.

use super::{ProviderAdapter, bounded, classify_http_failure, classify_transport_failure};
use async_trait::async_trait;
use conclave_application::ports::llm_gateway::{
    ChatRole, GatewayError, GenerateReply, GenerateRequest, ResponseFormat,
};
use conclave_domain::TokenUsage;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent<'a>>,
    contents: Vec<WireContent<'a>>,
    generation_config: WireGenerationConfig,
}

#[derive(Deserialize)]
struct WireResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseContent {
    #[serde(default)]
    parts: Vec<WireResponsePart>,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: Option<WireResponseContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    usage_metadata: Option<WireUsage>,
}

/// Adapter for Google's Generative Language (Gemini) API.
///
/// Authentication rides in a query parameter rather than a header, and the
/// JSON response mode maps to `responseMimeType`.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
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
        let system_instruction = request
            .messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| WireContent {
                role: None,
                parts: vec![WirePart { text: &m.content }],
            });
        let contents: Vec<WireContent<'_>> = request
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| WireContent {
                role: Some(match m.role {
                    ChatRole::Assistant => "model",
                    _ => "user",
                }),
                parts: vec![WirePart { text: &m.content }],
            })
            .collect();

        let body = WireRequest {
            system_instruction,
            contents,
            generation_config: WireGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: match request.response_format {
                    ResponseFormat::JsonObject => Some("application/json"),
                    ResponseFormat::Text => None,
                },
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, request.model
        );
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
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
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if content.is_empty() {
            return Err(GatewayError::MalformedResponse(
                "candidate carried no text".to_string(),
            ));
        }

        Ok(GenerateReply {
            text: content,
            usage: parsed.usage_metadata.map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
            request_id: None,
        })
    }
}

#[async_trait]
impl ProviderAdapter for GeminiProvider {
    fn key(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateReply, GatewayError> {
        bounded(request.timeout_ms, &cancel, self.call(request)).await
    }
}
