//! Facilitator service
//!
//! Calls the gateway with the fixed facilitator prompt and parses the
//! structured output. Parse failures and recoverable provider errors are
//! retried up to three times; when every attempt fails the round simply
//! proceeds without a facilitator message. The facilitator never votes.

use crate::ports::llm_gateway::{
    ChatMessage, GatewayError, GenerateRequest, LlmGateway, ResponseFormat,
};
use conclave_domain::{FacilitatorConfig, FacilitatorOutput, Message, PromptBuilder};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
const FACILITATOR_MAX_TOKENS: u32 = 2_048;
/// Floor applied to the configured per-call timeout.
const MIN_TIMEOUT_MS: u64 = 15_000;

/// Inputs for one facilitator pass.
pub struct FacilitatorRequest<'a> {
    pub topic: &'a str,
    /// The round being summarized (the one that just completed).
    pub summarized_round: u32,
    pub rolling_summary: Option<&'a str>,
    /// Messages at or after the summarized round, capped by the caller.
    pub recent_messages: &'a [Message],
    pub proposal_draft: &'a str,
    pub provider_id: &'a str,
    pub model: &'a str,
    pub config: &'a FacilitatorConfig,
}

/// Structured round-summary generator.
pub struct FacilitatorService {
    gateway: Arc<dyn LlmGateway>,
}

impl FacilitatorService {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Run one facilitator pass.
    ///
    /// `Ok(None)` means every attempt failed and the round should continue
    /// without a facilitator message. The only error surfaced is
    /// cancellation.
    pub async fn invoke(
        &self,
        request: FacilitatorRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<Option<FacilitatorOutput>, GatewayError> {
        let prompt = PromptBuilder::facilitator(
            request.topic,
            request.summarized_round,
            request.rolling_summary,
            request.recent_messages,
            request.proposal_draft,
        );

        for attempt in 1..=MAX_ATTEMPTS {
            let generate = GenerateRequest {
                provider_id: request.provider_id.to_string(),
                model: request.model.to_string(),
                messages: vec![
                    ChatMessage::system(prompt.system.clone()),
                    ChatMessage::user(prompt.user.clone()),
                ],
                temperature: request.config.temperature,
                max_tokens: FACILITATOR_MAX_TOKENS,
                timeout_ms: request.config.timeout_ms.max(MIN_TIMEOUT_MS),
                response_format: ResponseFormat::JsonObject,
                metadata: None,
            };

            match self.gateway.generate_text(generate, cancel.clone()).await {
                Ok(reply) => match FacilitatorOutput::parse(&reply.text) {
                    Some(output) => return Ok(Some(output)),
                    None => {
                        debug!(attempt, "facilitator output did not parse");
                    }
                },
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    debug!(attempt, error = %err, "facilitator call failed");
                }
            }
        }

        warn!(
            round = request.summarized_round,
            "facilitator produced no usable output after {} attempts",
            MAX_ATTEMPTS
        );
        Ok(None)
    }
}
