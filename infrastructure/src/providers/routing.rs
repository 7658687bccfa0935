//! Routing gateway
//!
//! Holds the provider registry and implements the single gateway operation
//! the orchestrator consumes. Unknown providers are rejected; the virtual
//! `auto` provider routes by model-id prefix and falls back to the unique
//! configured provider when no family matches.

use super::{MockProvider, ProviderAdapter};
use async_trait::async_trait;
use conclave_application::ports::llm_gateway::{
    GatewayError, GenerateReply, GenerateRequest, LlmGateway,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Virtual provider key resolved by model-id prefix.
pub const AUTO_PROVIDER_KEY: &str = "auto";

/// Registry-backed gateway over heterogeneous provider adapters.
pub struct RoutingGateway {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl RoutingGateway {
    /// Build a gateway with the built-in mock provider always registered.
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        let mut adapters = adapters;
        if !adapters.iter().any(|a| a.key() == super::mock::MOCK_PROVIDER_KEY) {
            adapters.push(Arc::new(MockProvider::new()));
        }
        Self { adapters }
    }

    fn find(&self, key: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.iter().find(|a| a.key() == key)
    }

    /// Resolution for the virtual `auto` provider:
    /// model family prefix first, then the unique non-mock provider, then
    /// the mock itself when nothing else is configured.
    fn resolve_auto(&self, model: &str) -> Result<&Arc<dyn ProviderAdapter>, GatewayError> {
        let family = if model.starts_with("gpt") || model.starts_with("o1") || model.starts_with("o3")
        {
            Some("openai")
        } else if model.starts_with("claude") {
            Some("anthropic")
        } else if model.starts_with("gemini") {
            Some("gemini")
        } else if model.starts_with("mock") {
            Some(super::mock::MOCK_PROVIDER_KEY)
        } else {
            None
        };

        if let Some(key) = family
            && let Some(adapter) = self.find(key)
        {
            return Ok(adapter);
        }

        let mut non_mock = self
            .adapters
            .iter()
            .filter(|a| a.key() != super::mock::MOCK_PROVIDER_KEY);
        match (non_mock.next(), non_mock.next()) {
            (Some(only), None) => Ok(only),
            (None, _) => self
                .find(super::mock::MOCK_PROVIDER_KEY)
                .ok_or_else(|| GatewayError::UnknownProvider(AUTO_PROVIDER_KEY.to_string())),
            _ => Err(GatewayError::UnknownProvider(format!(
                "auto: no provider for model {}",
                model
            ))),
        }
    }

    fn resolve(&self, request: &GenerateRequest) -> Result<&Arc<dyn ProviderAdapter>, GatewayError> {
        if request.provider_id == AUTO_PROVIDER_KEY {
            return self.resolve_auto(&request.model);
        }
        self.find(&request.provider_id)
            .ok_or_else(|| GatewayError::UnknownProvider(request.provider_id.clone()))
    }
}

#[async_trait]
impl LlmGateway for RoutingGateway {
    async fn generate_text(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateReply, GatewayError> {
        let adapter = self.resolve(&request)?;
        trace!(provider = adapter.key(), model = %request.model, "dispatching generation");
        adapter.generate(&request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_application::ports::llm_gateway::{ChatMessage, ResponseFormat};

    struct NamedProvider {
        key: &'static str,
    }

    #[async_trait]
    impl ProviderAdapter for NamedProvider {
        fn key(&self) -> &str {
            self.key
        }

        async fn generate(
            &self,
            _request: &GenerateRequest,
            _cancel: CancellationToken,
        ) -> Result<GenerateReply, GatewayError> {
            Ok(GenerateReply::text(format!("answered by {}", self.key)))
        }
    }

    fn provider(key: &'static str) -> Arc<dyn ProviderAdapter> {
        Arc::new(NamedProvider { key })
    }

    fn request(provider_id: &str, model: &str) -> GenerateRequest {
        GenerateRequest {
            provider_id: provider_id.to_string(),
            model: model.to_string(),
            messages: vec![ChatMessage::user("hello")],
            temperature: 0.7,
            max_tokens: 256,
            timeout_ms: 1_000,
            response_format: ResponseFormat::Text,
            metadata: None,
        }
    }

    async fn answer(gateway: &RoutingGateway, provider_id: &str, model: &str) -> String {
        gateway
            .generate_text(request(provider_id, model), CancellationToken::new())
            .await
            .expect("generate")
            .text
    }

    #[tokio::test]
    async fn explicit_provider_keys_route_directly() {
        let gateway = RoutingGateway::new(vec![provider("openai"), provider("anthropic")]);
        assert_eq!(
            answer(&gateway, "anthropic", "claude-sonnet-4-0").await,
            "answered by anthropic"
        );
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let gateway = RoutingGateway::new(vec![provider("openai")]);
        let result = gateway
            .generate_text(request("bedrock", "some-model"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(GatewayError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn auto_routes_by_model_family() {
        let gateway = RoutingGateway::new(vec![
            provider("openai"),
            provider("anthropic"),
            provider("gemini"),
        ]);
        assert_eq!(answer(&gateway, "auto", "gpt-4.1").await, "answered by openai");
        assert_eq!(answer(&gateway, "auto", "o3-mini").await, "answered by openai");
        assert_eq!(
            answer(&gateway, "auto", "claude-sonnet-4-0").await,
            "answered by anthropic"
        );
        assert_eq!(
            answer(&gateway, "auto", "gemini-2.0-flash").await,
            "answered by gemini"
        );
    }

    #[tokio::test]
    async fn auto_falls_back_to_the_unique_provider() {
        let gateway = RoutingGateway::new(vec![provider("anthropic")]);
        // unknown family, exactly one configured provider
        assert_eq!(
            answer(&gateway, "auto", "qwen-72b").await,
            "answered by anthropic"
        );
    }

    #[tokio::test]
    async fn auto_with_ambiguous_fallback_is_rejected() {
        let gateway = RoutingGateway::new(vec![provider("openai"), provider("anthropic")]);
        let result = gateway
            .generate_text(request("auto", "qwen-72b"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(GatewayError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn mock_is_always_registered() {
        let gateway = RoutingGateway::new(vec![]);
        let reply = gateway
            .generate_text(request("mock", "mock-default"), CancellationToken::new())
            .await
            .expect("mock");
        assert!(!reply.text.is_empty());
    }
}
