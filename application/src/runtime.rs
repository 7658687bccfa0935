//! Runtime binder
//!
//! Wires one store and one gateway to a map of per-meeting orchestrators
//! and per-meeting subscriber channels. A host process constructs exactly
//! one runtime and drives every meeting through it; meetings progress
//! independently of each other.

use crate::event_bus::EventBus;
use crate::ports::llm_gateway::LlmGateway;
use crate::ports::store::{EventQuery, Store, StoreError};
use crate::use_cases::run_meeting::{MeetingOrchestrator, RunMeetingError};
use conclave_domain::{
    ConfigValidationError, Meeting, MeetingConfig, MeetingEvent, Message, validate_config,
    validate_topic,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Errors surfaced at the runtime boundary.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid meeting: {0}")]
    Validation(#[from] ConfigValidationError),

    #[error("Meeting error: {0}")]
    Meeting(#[from] RunMeetingError),

    #[error("Meeting {0} is already running")]
    AlreadyRunning(String),

    #[error("Meeting {0} is not running")]
    NotRunning(String),
}

struct MeetingHandle {
    orchestrator: Arc<MeetingOrchestrator>,
    task: JoinHandle<()>,
}

/// Process-wide composition of store, gateway and running meetings.
pub struct MeetingRuntime {
    store: Arc<dyn Store>,
    gateway: Arc<dyn LlmGateway>,
    bus: EventBus,
    meetings: RwLock<HashMap<String, MeetingHandle>>,
}

impl MeetingRuntime {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn LlmGateway>) -> Arc<Self> {
        Arc::new(Self {
            store,
            gateway,
            bus: EventBus::new(),
            meetings: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Validate and create a meeting in DRAFT. Rejected configs never
    /// create a row.
    pub async fn create_meeting(
        &self,
        topic: &str,
        config: MeetingConfig,
    ) -> Result<Meeting, RuntimeError> {
        validate_topic(topic)?;
        validate_config(&config)?;
        let meeting = self.store.create_meeting(topic.to_string(), config).await?;
        info!(meeting_id = %meeting.id, "meeting created");
        Ok(meeting)
    }

    /// Spawn the orchestrator task for a draft meeting.
    pub async fn start_meeting(&self, meeting_id: &str) -> Result<(), RuntimeError> {
        let mut meetings = self.meetings.write().await;
        if meetings.contains_key(meeting_id) {
            return Err(RuntimeError::AlreadyRunning(meeting_id.to_string()));
        }
        // surface NotFound before spawning anything
        self.store.get_meeting(meeting_id).await?;

        let orchestrator = Arc::new(MeetingOrchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            self.bus.clone(),
            meeting_id,
        ));
        let task = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                if let Err(err) = orchestrator.run().await {
                    error!(
                        meeting_id = %orchestrator.meeting_id(),
                        error = %err,
                        "meeting run ended with an error"
                    );
                }
            }
        });

        meetings.insert(
            meeting_id.to_string(),
            MeetingHandle { orchestrator, task },
        );
        Ok(())
    }

    /// Forward a user message into a running meeting (§ interrupt semantics
    /// apply when the meeting is mid-vote).
    pub async fn post_user_message(
        &self,
        meeting_id: &str,
        content: &str,
    ) -> Result<Message, RuntimeError> {
        let orchestrator = self.orchestrator(meeting_id).await?;
        Ok(orchestrator.post_user_message(content).await?)
    }

    /// Abort a running meeting.
    pub async fn abort_meeting(&self, meeting_id: &str, reason: &str) -> Result<(), RuntimeError> {
        let orchestrator = self.orchestrator(meeting_id).await?;
        Ok(orchestrator.abort(reason).await?)
    }

    /// Live event subscription for one meeting. Combine with
    /// [`MeetingRuntime::events_after`] to backfill a cursor gap.
    pub fn subscribe(&self, meeting_id: &str) -> broadcast::Receiver<MeetingEvent> {
        self.bus.subscribe(meeting_id)
    }

    /// Replay stored events with id greater than `after`.
    pub async fn events_after(
        &self,
        meeting_id: &str,
        after: Option<u64>,
    ) -> Result<Vec<MeetingEvent>, RuntimeError> {
        Ok(self
            .store
            .list_events(EventQuery {
                meeting_id: meeting_id.to_string(),
                after,
                limit: None,
            })
            .await?)
    }

    pub async fn get_meeting(&self, meeting_id: &str) -> Result<Meeting, RuntimeError> {
        Ok(self.store.get_meeting(meeting_id).await?)
    }

    pub async fn list_meetings(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<Vec<Meeting>, RuntimeError> {
        Ok(self.store.list_meetings(limit, cursor).await?)
    }

    /// Wait for a meeting's orchestrator task to finish and release its
    /// handle.
    pub async fn wait_for_meeting(&self, meeting_id: &str) -> Result<(), RuntimeError> {
        let handle = {
            let mut meetings = self.meetings.write().await;
            meetings
                .remove(meeting_id)
                .ok_or_else(|| RuntimeError::NotRunning(meeting_id.to_string()))?
        };
        if let Err(err) = handle.task.await {
            error!(meeting_id, error = %err, "meeting task join failed");
        }
        Ok(())
    }

    async fn orchestrator(
        &self,
        meeting_id: &str,
    ) -> Result<Arc<MeetingOrchestrator>, RuntimeError> {
        let meetings = self.meetings.read().await;
        meetings
            .get(meeting_id)
            .map(|handle| Arc::clone(&handle.orchestrator))
            .ok_or_else(|| RuntimeError::NotRunning(meeting_id.to_string()))
    }
}
