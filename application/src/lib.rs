//! Application layer for conclave
//!
//! Use cases (the meeting orchestrator), ports consumed by them (store,
//! LLM gateway), the event bus and the runtime binder. Adapters for the
//! ports live in the infrastructure layer.

pub mod event_bus;
pub mod facilitator;
pub mod ports;
pub mod runtime;
pub mod use_cases;

pub use event_bus::EventBus;
pub use facilitator::FacilitatorService;
pub use ports::llm_gateway::{
    ChatMessage, ChatRole, GatewayError, GenerateReply, GenerateRequest, LlmGateway,
    ResponseFormat,
};
pub use ports::store::{
    EventQuery, MeetingLockGuard, MeetingPatch, MessageQuery, Store, StoreError, VoteQuery,
};
pub use runtime::{MeetingRuntime, RuntimeError};
pub use use_cases::run_meeting::{MeetingOrchestrator, RunMeetingError};
