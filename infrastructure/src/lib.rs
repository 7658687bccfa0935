//! Infrastructure layer for conclave
//!
//! Adapters for the application ports: the in-memory store, provider
//! adapters behind the routing gateway, file configuration and the JSONL
//! event log.

pub mod config;
pub mod logging;
pub mod providers;
pub mod store;


pub use config::{FileConfig, load_file_config};
pub use logging::JsonlEventLog;
pub use providers::{
    MockProvider, ProviderAdapter, RoutingGateway, anthropic::AnthropicProvider,
    gemini::GeminiProvider, openai::OpenAiProvider,
};
pub use store::InMemoryStore;
