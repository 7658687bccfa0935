//! Provider adapters and the routing gateway.
//!
//! Each adapter turns the provider-neutral request into one provider's wire
//! format and classifies failures into the gateway error taxonomy. The
//! routing gateway owns the registry and the virtual `auto` provider.

pub mod anthropic;
pub mod gemini;
mod mock;
pub mod openai;
mod routing;

pub use mock::MockProvider;
pub use routing::RoutingGateway;

use async_trait::async_trait;
use conclave_application::ports::llm_gateway::{GatewayError, GenerateReply, GenerateRequest};
use conclave_domain::util::truncate_str;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One configured upstream provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry key the gateway routes on (e.g. "openai").
    fn key(&self) -> &str;

    /// Generate a whole completion. Implementations run under
    /// [`bounded`], so the caller's timeout and cancellation are already
    /// taken care of when they use it.
    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateReply, GatewayError>;
}

/// Race a provider future against the caller's timeout and cancellation
/// token, whichever fires first.
pub(crate) async fn bounded<F, T>(
    timeout_ms: u64,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }
}

/// Classify a non-success HTTP response.
///
/// HTML bodies (proxies, error pages) are malformed-response failures
/// regardless of status; auth and validation statuses are final; everything
/// else keeps its status for the recoverability decision.
pub(crate) fn classify_http_failure(status: u16, body: &str) -> GatewayError {
    if body.trim_start().starts_with('<') {
        return GatewayError::MalformedResponse(format!("HTML response body (status {})", status));
    }
    match status {
        401 | 403 => GatewayError::Auth(truncate_str(body, 200).to_string()),
        400 | 404 | 422 => GatewayError::InvalidRequest(truncate_str(body, 200).to_string()),
        429 => GatewayError::RateLimited(truncate_str(body, 200).to_string()),
        _ => GatewayError::UpstreamStatus {
            status,
            detail: truncate_str(body, 200).to_string(),
        },
    }
}

/// Map a reqwest transport failure.
pub(crate) fn classify_transport_failure(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err.to_string())
    }
}
