//! Meeting orchestrator
//!
//! The per-meeting state machine: drives discussion rounds, the facilitator
//! pass, vote sessions and the final-document approval loop, emitting
//! events along the way. One orchestrator owns one meeting; different
//! meetings run independently.
//!
//! Long-running gateway calls are never made under the store lock. Instead
//! the meeting's `stage_version` acts as an optimistic-concurrency token:
//! every durable write produced by a concurrent phase re-reads the meeting
//! and drops itself when the stage moved underneath it.

mod discussion;
mod final_document;
mod voting;
mod types;

pub use types::RunMeetingError;
pub(crate) use types::RoundOutcome;

use crate::event_bus::EventBus;
use crate::facilitator::FacilitatorService;
use crate::ports::llm_gateway::{GatewayError, GenerateReply, GenerateRequest, LlmGateway};
use crate::ports::store::{MeetingPatch, MessageQuery, Store, StoreError, VoteQuery};
use chrono::Utc;
use conclave_domain::{
    ApprovalRecord, ErrorCode, EventKind, Meeting, MeetingResult, MeetingState, Message,
    MessageRole, SystemSender, VoteSessionStatus, report,
};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Provider the per-call salvage path retries against.
pub(crate) const FALLBACK_PROVIDER: &str = "mock";
/// Model used on the salvage path.
pub(crate) const FALLBACK_MODEL: &str = "mock-default";

/// The per-meeting state machine.
pub struct MeetingOrchestrator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn LlmGateway>,
    bus: EventBus,
    facilitator: FacilitatorService,
    meeting_id: String,
    /// Lifetime of the whole run.
    meeting_cancel: CancellationToken,
    /// Lifetime of the current vote session; child of `meeting_cancel`.
    vote_cancel: Mutex<Option<CancellationToken>>,
}

impl MeetingOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn LlmGateway>,
        bus: EventBus,
        meeting_id: impl Into<String>,
    ) -> Self {
        let facilitator = FacilitatorService::new(Arc::clone(&gateway));
        Self {
            store,
            gateway,
            bus,
            facilitator,
            meeting_id: meeting_id.into(),
            meeting_cancel: CancellationToken::new(),
            vote_cancel: Mutex::new(None),
        }
    }

    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    /// Drive the meeting from DRAFT to a terminal state.
    ///
    /// Never leaves the meeting in a RUNNING state: unexpected errors emit
    /// a `RUNNER_ERROR` event and force a best-effort abort.
    pub async fn run(&self) -> Result<(), RunMeetingError> {
        match self.run_inner().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => {
                debug!(meeting_id = %self.meeting_id, "meeting run cancelled");
                Ok(())
            }
            Err(err) => {
                error!(meeting_id = %self.meeting_id, error = %err, "meeting run failed");
                let _ = self
                    .emit(EventKind::Error {
                        code: ErrorCode::RunnerError,
                        message: err.to_string(),
                        details: None,
                    })
                    .await;
                let _ = self
                    .finish_aborted("internal orchestrator error", None, Vec::new())
                    .await;
                Err(err)
            }
        }
    }

    async fn run_inner(&self) -> Result<(), RunMeetingError> {
        self.start().await?;

        loop {
            if self.meeting_cancel.is_cancelled() {
                return Err(RunMeetingError::Cancelled);
            }

            let meeting = self.store.get_meeting(&self.meeting_id).await?;
            match meeting.state {
                MeetingState::RunningDiscussion => {
                    if meeting.round > meeting.config.threshold.max_rounds {
                        self.finish_aborted("Max rounds reached", None, Vec::new())
                            .await?;
                        continue;
                    }

                    self.facilitator_pass(&meeting).await?;

                    match self.run_discussion_round(&meeting).await? {
                        RoundOutcome::Invalidated => continue,
                        RoundOutcome::Completed { agent_messages } => {
                            let round = meeting.round;
                            if agent_messages == 0 {
                                self.emit(EventKind::Error {
                                    code: ErrorCode::DiscussionEmptySkipVote,
                                    message: format!(
                                        "round {} produced no agent messages; skipping vote",
                                        round
                                    ),
                                    details: None,
                                })
                                .await?;
                                self.advance_round(round).await?;
                            } else if round >= 1 && round >= meeting.config.threshold.min_rounds {
                                self.run_vote_stage(&meeting).await?;
                            } else {
                                self.advance_round(round).await?;
                            }
                        }
                    }
                }
                MeetingState::FinishedAccepted | MeetingState::FinishedAborted => {
                    info!(meeting_id = %self.meeting_id, state = %meeting.state, "meeting finished");
                    return Ok(());
                }
                state => {
                    return Err(RunMeetingError::InvalidState(format!(
                        "run loop observed {}",
                        state
                    )));
                }
            }
        }
    }

    /// DRAFT → RUNNING_DISCUSSION: resolve the effective discussion mode
    /// and lift the stage version.
    async fn start(&self) -> Result<(), RunMeetingError> {
        let updated = {
            let _guard = self.store.lock_meeting(&self.meeting_id).await?;
            let meeting = self.store.get_meeting(&self.meeting_id).await?;
            if meeting.state != MeetingState::Draft {
                return Err(RunMeetingError::InvalidState(format!(
                    "cannot start a meeting in state {}",
                    meeting.state
                )));
            }

            let enabled = meeting.config.enabled_agents().len();
            let mode = meeting
                .config
                .discussion
                .mode
                .resolve(enabled, meeting.config.discussion.auto_parallel_min_agents);
            info!(
                meeting_id = %self.meeting_id,
                %mode,
                agents = enabled,
                "starting meeting"
            );

            self.store
                .update_meeting(
                    &self.meeting_id,
                    MeetingPatch::new()
                        .state(MeetingState::RunningDiscussion)
                        .stage_version(meeting.stage_version + 1)
                        .effective_discussion_mode(mode),
                )
                .await?
        };

        self.emit_state_changed(&updated).await?;
        Ok(())
    }

    /// Move to the next round after a vote-free round completion.
    async fn advance_round(&self, completed_round: u32) -> Result<(), RunMeetingError> {
        let updated = {
            let _guard = self.store.lock_meeting(&self.meeting_id).await?;
            let meeting = self.store.get_meeting(&self.meeting_id).await?;
            // a user interrupt or abort may have moved the meeting already
            if meeting.state != MeetingState::RunningDiscussion
                || meeting.round != completed_round
            {
                return Ok(());
            }
            self.store
                .update_meeting(
                    &self.meeting_id,
                    MeetingPatch::new().round(completed_round + 1),
                )
                .await?
        };

        self.emit_state_changed(&updated).await?;
        Ok(())
    }

    /// Explicit abort: signal cancellation and finish the meeting.
    pub async fn abort(&self, reason: &str) -> Result<(), RunMeetingError> {
        info!(meeting_id = %self.meeting_id, reason, "aborting meeting");
        // the vote token is a child of meeting_cancel; one signal stops both
        self.meeting_cancel.cancel();
        self.finish_aborted(reason, None, Vec::new()).await
    }

    /// Append a user message. During a vote this is an interrupt: the stage
    /// version lifts, the active session is marked aborted and the meeting
    /// returns to discussion; in-flight votes become stale and are dropped
    /// at persistence time.
    pub async fn post_user_message(&self, content: &str) -> Result<Message, RunMeetingError> {
        let (message, interrupted) = {
            let _guard = self.store.lock_meeting(&self.meeting_id).await?;
            let meeting = self.store.get_meeting(&self.meeting_id).await?;
            if meeting.state.is_terminal() || meeting.state == MeetingState::Draft {
                return Err(RunMeetingError::InvalidState(format!(
                    "cannot post a user message in state {}",
                    meeting.state
                )));
            }

            let message = self
                .store
                .append_message(Message::user(&self.meeting_id, content, meeting.round))
                .await?;

            if meeting.state == MeetingState::RunningVote {
                if let Some(token) = self.vote_cancel.lock().expect("vote token lock").take() {
                    token.cancel();
                }
                if let Some(session_id) = &meeting.active_vote_session_id {
                    let _ = self
                        .store
                        .finalize_vote_session(
                            &self.meeting_id,
                            session_id,
                            VoteSessionStatus::Aborted,
                            Utc::now(),
                        )
                        .await;
                }
                let updated = self
                    .store
                    .update_meeting(
                        &self.meeting_id,
                        MeetingPatch::new()
                            .state(MeetingState::RunningDiscussion)
                            .stage_version(meeting.stage_version + 1)
                            .round(meeting.round + 1)
                            .active_vote_session(None),
                    )
                    .await?;
                (message, Some(updated))
            } else {
                (message, None)
            }
        };

        self.emit(EventKind::MessageFinal {
            message: message.clone(),
        })
        .await?;
        if let Some(updated) = interrupted {
            info!(meeting_id = %self.meeting_id, "user message interrupted the vote stage");
            self.emit_state_changed(&updated).await?;
        }

        Ok(message)
    }

    /// ---- shared helpers -------------------------------------------------

    pub(crate) async fn emit(&self, kind: EventKind) -> Result<(), StoreError> {
        // append before broadcast: replay must always be a gap-free prefix
        let event = self.store.append_event(&self.meeting_id, kind).await?;
        self.bus.publish(&event);
        Ok(())
    }

    pub(crate) async fn emit_state_changed(&self, meeting: &Meeting) -> Result<(), StoreError> {
        self.emit(EventKind::StateChanged {
            state: meeting.state,
            round: meeting.round,
            stage_version: meeting.stage_version,
        })
        .await
    }

    /// Terminal abort transition. Idempotent: a meeting that already
    /// finished is left untouched.
    pub(crate) async fn finish_aborted(
        &self,
        reason: &str,
        final_document: Option<String>,
        approvals: Vec<ApprovalRecord>,
    ) -> Result<(), RunMeetingError> {
        let updated = {
            let _guard = self.store.lock_meeting(&self.meeting_id).await?;
            let meeting = self.store.get_meeting(&self.meeting_id).await?;
            if meeting.state.is_terminal() {
                return Ok(());
            }

            if let Some(session_id) = &meeting.active_vote_session_id {
                let _ = self
                    .store
                    .finalize_vote_session(
                        &self.meeting_id,
                        session_id,
                        VoteSessionStatus::Aborted,
                        Utc::now(),
                    )
                    .await;
            }

            let result = self
                .build_result(&meeting, false, reason, final_document.as_deref(), &approvals)
                .await?;
            self.store
                .update_meeting(
                    &self.meeting_id,
                    MeetingPatch::new()
                        .state(MeetingState::FinishedAborted)
                        .stage_version(meeting.stage_version + 1)
                        .active_vote_session(None)
                        .result(result),
                )
                .await?
        };

        self.emit_state_changed(&updated).await?;
        Ok(())
    }

    /// Assemble the terminal `result` payload from the store's view of the
    /// meeting.
    pub(crate) async fn build_result(
        &self,
        meeting: &Meeting,
        accepted: bool,
        reason: &str,
        final_document: Option<&str>,
        approvals: &[ApprovalRecord],
    ) -> Result<MeetingResult, RunMeetingError> {
        let messages = self
            .store
            .list_messages(MessageQuery::all(&self.meeting_id))
            .await?;
        let votes = self.store.list_votes(VoteQuery::all(&self.meeting_id)).await?;
        let concluded_at = Utc::now();

        let ctx = report::ReportContext {
            meeting,
            messages: &messages,
            votes: &votes,
            final_document,
            approvals,
            accepted,
            reason,
            concluded_at,
        };

        let report_markdown = meeting
            .config
            .output
            .wants_markdown()
            .then(|| report::render_markdown(&ctx));

        Ok(MeetingResult {
            accepted,
            reason: reason.to_string(),
            concluded_at,
            report_markdown,
            summary: report::summary_json(&ctx),
        })
    }

    /// Latest facilitator message content, used as the rolling summary.
    pub(crate) fn rolling_summary(messages: &[Message]) -> Option<String> {
        messages
            .iter()
            .rev()
            .find(|m| {
                m.role == MessageRole::System
                    && m.system_sender == Some(SystemSender::Facilitator)
            })
            .map(|m| m.content.clone())
    }

    /// User messages visible to a speaker this round: this and the prior
    /// round.
    pub(crate) fn recent_user_messages(messages: &[Message], round: u32) -> Vec<Message> {
        messages
            .iter()
            .filter(|m| m.role == MessageRole::User && m.meta.round + 1 >= round)
            .cloned()
            .collect()
    }
}

/// Issue a gateway call with the mock salvage path layered around it.
///
/// Recoverable failures retry once against the built-in mock provider and
/// record the fallback provenance; cancellation and final errors propagate
/// unchanged.
pub(crate) async fn generate_with_fallback(
    gateway: &dyn LlmGateway,
    request: GenerateRequest,
    cancel: CancellationToken,
) -> Result<(GenerateReply, Option<String>), GatewayError> {
    let original_provider = request.provider_id.clone();
    match gateway.generate_text(request.clone(), cancel.clone()).await {
        Ok(reply) => Ok((reply, None)),
        Err(err) if err.is_cancelled() => Err(err),
        Err(err) if err.is_recoverable() => {
            warn!(
                provider = %original_provider,
                error = %err,
                "provider call failed, retrying against mock"
            );
            let mut fallback = request;
            fallback.provider_id = FALLBACK_PROVIDER.to_string();
            fallback.model = FALLBACK_MODEL.to_string();
            let reply = gateway.generate_text(fallback, cancel).await?;
            Ok((
                reply,
                Some(format!("fallback:{}->{}", original_provider, FALLBACK_PROVIDER)),
            ))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::llm_gateway::{ChatRole, ResponseFormat};
    use crate::ports::store::{
        EventQuery, MeetingLockGuard, MessageQuery, Store, VoteQuery,
    };
    use crate::runtime::MeetingRuntime;
    use async_trait::async_trait;
    use conclave_domain::{
        AgentConfig, DiscussionConfig, DiscussionMode, FacilitatorConfig, MeetingConfig,
        MeetingEvent, OutputFormat, ThresholdConfig, Vote, VoteSession, VoteSessionStatus,
    };
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::sync::watch;

    // ==================== In-memory test store ====================

    #[derive(Default)]
    struct TestStore {
        meetings: Mutex<HashMap<String, Meeting>>,
        messages: Mutex<Vec<Message>>,
        votes: Mutex<Vec<Vote>>,
        sessions: Mutex<Vec<VoteSession>>,
        events: Mutex<Vec<conclave_domain::MeetingEvent>>,
        locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
        seq: AtomicU64,
    }

    impl TestStore {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn next_id(&self, prefix: &str) -> String {
            format!("{}-{}", prefix, self.seq.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn sessions_snapshot(&self) -> Vec<VoteSession> {
            self.sessions.lock().unwrap().clone()
        }

        fn votes_snapshot(&self) -> Vec<Vote> {
            self.votes.lock().unwrap().clone()
        }

        fn messages_snapshot(&self) -> Vec<Message> {
            self.messages.lock().unwrap().clone()
        }

        fn events_snapshot(&self) -> Vec<conclave_domain::MeetingEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Store for TestStore {
        async fn lock_meeting(&self, meeting_id: &str) -> Result<MeetingLockGuard, StoreError> {
            let lock = {
                let mut locks = self.locks.lock().unwrap();
                Arc::clone(
                    locks
                        .entry(meeting_id.to_string())
                        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
                )
            };
            Ok(MeetingLockGuard::new(lock.lock_owned().await))
        }

        async fn create_meeting(
            &self,
            topic: String,
            config: MeetingConfig,
        ) -> Result<Meeting, StoreError> {
            let mut meeting = Meeting::draft(topic, config);
            meeting.id = self.next_id("mtg");
            self.meetings
                .lock()
                .unwrap()
                .insert(meeting.id.clone(), meeting.clone());
            Ok(meeting)
        }

        async fn get_meeting(&self, meeting_id: &str) -> Result<Meeting, StoreError> {
            self.meetings
                .lock()
                .unwrap()
                .get(meeting_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    entity: "meeting",
                    id: meeting_id.to_string(),
                })
        }

        async fn list_meetings(
            &self,
            limit: usize,
            _cursor: Option<String>,
        ) -> Result<Vec<Meeting>, StoreError> {
            Ok(self
                .meetings
                .lock()
                .unwrap()
                .values()
                .take(limit)
                .cloned()
                .collect())
        }

        async fn update_meeting(
            &self,
            meeting_id: &str,
            patch: MeetingPatch,
        ) -> Result<Meeting, StoreError> {
            let mut meetings = self.meetings.lock().unwrap();
            let meeting = meetings.get_mut(meeting_id).ok_or_else(|| StoreError::NotFound {
                entity: "meeting",
                id: meeting_id.to_string(),
            })?;
            if let Some(sv) = patch.stage_version {
                if sv < meeting.stage_version {
                    return Err(StoreError::InvalidPatch(
                        "stage_version must not decrease".to_string(),
                    ));
                }
                meeting.stage_version = sv;
            }
            if let Some(state) = patch.state {
                meeting.state = state;
            }
            if let Some(round) = patch.round {
                meeting.round = round;
            }
            if let Some(mode) = patch.effective_discussion_mode {
                meeting.effective_discussion_mode = Some(mode);
            }
            if let Some(active) = patch.active_vote_session_id {
                meeting.active_vote_session_id = active;
            }
            if let Some(result) = patch.result {
                meeting.result = Some(result);
            }
            meeting.updated_at = Utc::now();
            Ok(meeting.clone())
        }

        async fn append_message(&self, mut message: Message) -> Result<Message, StoreError> {
            message.id = self.next_id("msg");
            self.messages.lock().unwrap().push(message.clone());
            Ok(message)
        }

        async fn list_messages(&self, query: MessageQuery) -> Result<Vec<Message>, StoreError> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.meeting_id == query.meeting_id)
                .cloned()
                .collect())
        }

        async fn create_vote_session(
            &self,
            mut session: VoteSession,
        ) -> Result<VoteSession, StoreError> {
            session.id = self.next_id("vs");
            self.sessions.lock().unwrap().push(session.clone());
            Ok(session)
        }

        async fn get_vote_session(
            &self,
            meeting_id: &str,
            session_id: &str,
        ) -> Result<VoteSession, StoreError> {
            self.sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.meeting_id == meeting_id && s.id == session_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    entity: "vote session",
                    id: session_id.to_string(),
                })
        }

        async fn finalize_vote_session(
            &self,
            meeting_id: &str,
            session_id: &str,
            status: VoteSessionStatus,
            ended_at: chrono::DateTime<Utc>,
        ) -> Result<VoteSession, StoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .iter_mut()
                .find(|s| s.meeting_id == meeting_id && s.id == session_id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "vote session",
                    id: session_id.to_string(),
                })?;
            session.status = status;
            session.ended_at = Some(ended_at);
            Ok(session.clone())
        }

        async fn append_vote(&self, mut vote: Vote) -> Result<Vote, StoreError> {
            {
                let meetings = self.meetings.lock().unwrap();
                let meeting = meetings.get(&vote.meeting_id).ok_or_else(|| {
                    StoreError::NotFound {
                        entity: "meeting",
                        id: vote.meeting_id.clone(),
                    }
                })?;
                if meeting.stage_version != vote.stage_version {
                    return Err(StoreError::Conflict("stale vote".to_string()));
                }
            }
            vote.id = self.next_id("vote");
            self.votes.lock().unwrap().push(vote.clone());
            Ok(vote)
        }

        async fn list_votes(&self, query: VoteQuery) -> Result<Vec<Vote>, StoreError> {
            Ok(self
                .votes
                .lock()
                .unwrap()
                .iter()
                .filter(|v| {
                    v.meeting_id == query.meeting_id
                        && query
                            .vote_session_id
                            .as_ref()
                            .is_none_or(|sid| &v.vote_session_id == sid)
                })
                .cloned()
                .collect())
        }

        async fn append_event(
            &self,
            meeting_id: &str,
            kind: EventKind,
        ) -> Result<conclave_domain::MeetingEvent, StoreError> {
            let event = conclave_domain::MeetingEvent {
                id: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
                meeting_id: meeting_id.to_string(),
                at: Utc::now(),
                kind,
            };
            self.events.lock().unwrap().push(event.clone());
            Ok(event)
        }

        async fn list_events(
            &self,
            query: EventQuery,
        ) -> Result<Vec<conclave_domain::MeetingEvent>, StoreError> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| {
                    e.meeting_id == query.meeting_id
                        && query.after.is_none_or(|after| e.id > after)
                })
                .cloned()
                .collect())
        }
    }

    // ==================== Style-driven test gateway ====================

    /// Deterministic gateway: behavior keys off the model id and the prompt
    /// shape, mirroring the built-in mock provider.
    struct StyleGateway {
        fail_providers: HashSet<String>,
        hold_votes: AtomicBool,
        release: watch::Sender<bool>,
        calls: Mutex<Vec<GenerateRequest>>,
    }

    impl StyleGateway {
        fn new() -> Arc<Self> {
            let (release, _) = watch::channel(false);
            Arc::new(Self {
                fail_providers: HashSet::new(),
                hold_votes: AtomicBool::new(false),
                release,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(providers: &[&str]) -> Arc<Self> {
            let (release, _) = watch::channel(false);
            Arc::new(Self {
                fail_providers: providers.iter().map(|p| p.to_string()).collect(),
                hold_votes: AtomicBool::new(false),
                release,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn hold_votes(self: &Arc<Self>) {
            self.hold_votes.store(true, Ordering::SeqCst);
        }

        fn release_votes(self: &Arc<Self>) {
            self.hold_votes.store(false, Ordering::SeqCst);
            let _ = self.release.send(true);
        }

        fn calls_snapshot(&self) -> Vec<GenerateRequest> {
            self.calls.lock().unwrap().clone()
        }

        fn ballot_for(model: &str) -> String {
            match model {
                "mock-optimist" => {
                    r#"{"score": 90, "pass": true, "rationale": "Strong plan"}"#.to_string()
                }
                "mock-skeptic" => {
                    r#"{"score": 70, "pass": false, "rationale": "Too risky"}"#.to_string()
                }
                "mock-broken-json" => "I think this is fine overall.".to_string(),
                _ => r#"{"score": 75, "pass": true, "rationale": "Workable"}"#.to_string(),
            }
        }
    }

    #[async_trait]
    impl LlmGateway for StyleGateway {
        async fn generate_text(
            &self,
            request: GenerateRequest,
            cancel: tokio_util::sync::CancellationToken,
        ) -> Result<GenerateReply, GatewayError> {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            self.calls.lock().unwrap().push(request.clone());
            if self.fail_providers.contains(&request.provider_id) {
                return Err(GatewayError::Timeout);
            }

            let system = request
                .messages
                .iter()
                .find(|m| m.role == ChatRole::System)
                .map(|m| m.content.as_str())
                .unwrap_or("");

            let is_vote = system.contains("casting a vote")
                || system.contains("reviewing the final result document");
            if is_vote {
                if self.hold_votes.load(Ordering::SeqCst) {
                    let mut release = self.release.subscribe();
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                        _ = release.wait_for(|released| *released) => {}
                    }
                }
                return Ok(GenerateReply::text(Self::ballot_for(&request.model)));
            }

            if system.contains("meeting facilitator") {
                if request.model == "mock-broken-json" {
                    return Ok(GenerateReply::text("round went fine I guess"));
                }
                return Ok(GenerateReply::text(
                    r#"{"round_summary": "Positions are converging.", "disagreements": ["Rollout speed"], "proposed_patch": "Add a canary stage.", "next_focus": ["Rollback criteria"]}"#,
                ));
            }

            if system.contains("editor") {
                return Ok(GenerateReply::text(
                    "# Decision\nProceed.\n\n# Agreed Plan\nPhased rollout.",
                ));
            }

            // discussion
            Ok(GenerateReply::text(format!(
                "{} viewpoint on the topic",
                request.model
            )))
        }
    }

    // ==================== helpers ====================

    fn agent(id: &str, model: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            display_name: format!("Agent {}", id),
            provider: "mock".to_string(),
            model: model.to_string(),
            system_prompt: format!("You are {}.", id),
            temperature: 0.7,
            max_output_tokens: 512,
            enabled: true,
        }
    }

    fn config(agents: Vec<AgentConfig>, min_rounds: u32, max_rounds: u32) -> MeetingConfig {
        MeetingConfig {
            agents,
            discussion: DiscussionConfig {
                mode: DiscussionMode::Auto,
                ..DiscussionConfig::default()
            },
            facilitator: FacilitatorConfig::default(),
            threshold: ThresholdConfig {
                min_rounds,
                max_rounds,
                vote_timeout_ms: 1_000,
                ..ThresholdConfig::default()
            },
            output: OutputFormat::Both,
        }
    }

    async fn run_to_completion(
        store: Arc<TestStore>,
        gateway: Arc<StyleGateway>,
        topic: &str,
        config: MeetingConfig,
    ) -> Meeting {
        let meeting = store
            .create_meeting(topic.to_string(), config)
            .await
            .expect("create");
        let orchestrator = MeetingOrchestrator::new(
            store.clone(),
            gateway,
            EventBus::new(),
            meeting.id.clone(),
        );
        orchestrator.run().await.expect("run");
        store.get_meeting(&meeting.id).await.expect("get")
    }

    fn stage_versions_from_events(events: &[MeetingEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::StateChanged { stage_version, .. } => Some(*stage_version),
                _ => None,
            })
            .collect()
    }

    // ==================== scenarios ====================

    #[tokio::test]
    async fn optimist_meeting_is_accepted_with_unanimous_document() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        let agents = vec![
            agent("alice", "mock-optimist"),
            agent("bob", "mock-optimist"),
            agent("carol", "mock-optimist"),
        ];

        let meeting =
            run_to_completion(store.clone(), gateway, "Rollout plan", config(agents, 1, 4)).await;

        assert_eq!(meeting.state, MeetingState::FinishedAccepted);
        let result = meeting.result.expect("result");
        assert!(result.accepted);
        assert_eq!(result.reason, "accepted");
        assert!(result.report_markdown.is_some());
        assert!(result.summary["final_document"].is_string());
        assert_eq!(result.summary["approvals"].as_array().unwrap().len(), 3);

        // one proposal session finalized, one approval session finalized
        let sessions = store.sessions_snapshot();
        assert_eq!(sessions.len(), 2);
        assert!(sessions
            .iter()
            .all(|s| s.status == VoteSessionStatus::Finalized));

        // stage versions never decrease across state changes
        let versions = stage_versions_from_events(&store.events_snapshot());
        assert!(versions.windows(2).all(|w| w[0] <= w[1]), "{:?}", versions);
    }

    #[tokio::test]
    async fn round_zero_messages_land_in_config_order() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        let agents = vec![
            agent("alice", "mock-optimist"),
            agent("bob", "mock-optimist"),
            agent("carol", "mock-optimist"),
        ];

        let meeting =
            run_to_completion(store.clone(), gateway, "Rollout plan", config(agents, 1, 4)).await;

        let round0: Vec<Message> = store
            .messages_snapshot()
            .into_iter()
            .filter(|m| {
                m.meeting_id == meeting.id
                    && m.role == MessageRole::Agent
                    && m.meta.round == 0
            })
            .collect();
        let ids: Vec<&str> = round0.iter().filter_map(|m| m.agent_id.as_deref()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
        let turns: Vec<Option<usize>> = round0.iter().map(|m| m.meta.turn_index).collect();
        assert_eq!(turns, vec![Some(0), Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn neutral_scores_abort_at_max_rounds() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        let agents = vec![
            agent("alice", "mock-neutral"),
            agent("bob", "mock-neutral"),
            agent("carol", "mock-neutral"),
        ];

        let meeting =
            run_to_completion(store.clone(), gateway, "Rollout plan", config(agents, 1, 2)).await;

        assert_eq!(meeting.state, MeetingState::FinishedAborted);
        let result = meeting.result.expect("result");
        assert!(!result.accepted);
        assert_eq!(result.reason, "Max rounds reached");

        // every proposal session was evaluated and rejected
        let sessions = store.sessions_snapshot();
        assert!(!sessions.is_empty());
        assert!(sessions
            .iter()
            .all(|s| s.status == VoteSessionStatus::Finalized));

        // messages per round never exceed the enabled agent count
        let messages = store.messages_snapshot();
        for round in 0..=2 {
            let count = messages
                .iter()
                .filter(|m| m.role == MessageRole::Agent && m.meta.round == round)
                .count();
            assert!(count <= 3, "round {} has {} agent messages", round, count);
        }
    }

    #[tokio::test]
    async fn five_agent_mixed_panel_stays_below_threshold() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        let agents = vec![
            agent("a1", "mock-neutral"),
            agent("a2", "mock-neutral"),
            agent("a3", "mock-neutral"),
            agent("a4", "mock-neutral"),
            agent("a5", "mock-optimist"),
        ];

        let meeting =
            run_to_completion(store.clone(), gateway, "Rollout plan", config(agents, 1, 2)).await;

        // five agents resolve to serial turns under auto
        assert_eq!(
            meeting.effective_discussion_mode,
            Some(conclave_domain::EffectiveDiscussionMode::SerialTurn)
        );
        // (75 * 4 + 90) / 5 = 78, below the 80 threshold every time
        assert_eq!(meeting.state, MeetingState::FinishedAborted);
        assert_eq!(meeting.result.expect("result").reason, "Max rounds reached");

        let rejected_averages: Vec<Option<u32>> = store
            .events_snapshot()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::VoteSessionFinal {
                    accepted: false,
                    avg_score,
                    ..
                } => Some(*avg_score),
                _ => None,
            })
            .collect();
        assert!(!rejected_averages.is_empty());
        assert!(rejected_averages.iter().all(|avg| *avg == Some(78)));
    }

    #[tokio::test]
    async fn dissenting_reviewer_blocks_unanimity_and_aborts() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        let agents = vec![
            agent("alice", "mock-optimist"),
            agent("bob", "mock-optimist"),
            agent("carol", "mock-skeptic"),
        ];

        let meeting =
            run_to_completion(store.clone(), gateway, "Rollout plan", config(agents, 1, 4)).await;

        // proposal average (90+90+70)/3 = 83 accepts, unanimity never does
        assert_eq!(meeting.state, MeetingState::FinishedAborted);
        let result = meeting.result.expect("result");
        assert!(!result.accepted);
        assert!(
            result
                .reason
                .contains("not approved by all agents after 3 attempt(s)"),
            "reason: {}",
            result.reason
        );
        // the last draft is preserved in the summary
        assert!(result.summary["final_document"].is_string());

        let sessions = store.sessions_snapshot();
        let approvals: Vec<&VoteSession> = sessions
            .iter()
            .filter(|s| s.kind == conclave_domain::VoteKind::Approval)
            .collect();
        assert_eq!(approvals.len(), 3);
        assert!(approvals
            .iter()
            .all(|s| s.status == VoteSessionStatus::Incomplete));
    }

    #[tokio::test]
    async fn unparseable_vote_becomes_neutral_failing_ballot() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        let agents = vec![
            agent("alice", "mock-optimist"),
            agent("bob", "mock-optimist"),
            agent("carol", "mock-broken-json"),
        ];

        let meeting =
            run_to_completion(store.clone(), gateway, "Rollout plan", config(agents, 1, 1)).await;

        // (90 + 90 + 50) / 3 = 77 < 80, so the meeting runs out of rounds
        assert_eq!(meeting.state, MeetingState::FinishedAborted);

        let carol_votes: Vec<Vote> = store
            .votes_snapshot()
            .into_iter()
            .filter(|v| v.voter_agent_id == "carol")
            .collect();
        assert!(!carol_votes.is_empty());
        for vote in carol_votes {
            assert_eq!(vote.score, 50);
            assert!(!vote.pass);
            assert_eq!(
                vote.rationale.as_deref(),
                Some("Failed to parse vote response")
            );
        }
    }

    #[tokio::test]
    async fn recoverable_provider_failure_falls_back_to_mock() {
        let store = TestStore::new();
        let gateway = StyleGateway::failing(&["openai"]);
        let mut agents = vec![
            agent("alice", "mock-neutral"),
            agent("bob", "mock-neutral"),
            agent("carol", "mock-neutral"),
        ];
        agents[0].provider = "openai".to_string();
        agents[0].model = "gpt-4.1".to_string();

        let meeting =
            run_to_completion(store.clone(), gateway, "Rollout plan", config(agents, 1, 1)).await;
        assert_eq!(meeting.state, MeetingState::FinishedAborted);

        // alice's messages carry the fallback provenance and still landed
        let alice_messages: Vec<Message> = store
            .messages_snapshot()
            .into_iter()
            .filter(|m| m.agent_id.as_deref() == Some("alice"))
            .collect();
        assert!(!alice_messages.is_empty());
        for message in alice_messages {
            assert_eq!(
                message.meta.provider_request_id.as_deref(),
                Some("fallback:openai->mock")
            );
        }
    }

    #[tokio::test]
    async fn user_message_during_vote_aborts_the_session_and_drops_votes() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        gateway.hold_votes();

        let mut cfg = config(
            vec![
                agent("alice", "mock-neutral"),
                agent("bob", "mock-neutral"),
                agent("carol", "mock-neutral"),
            ],
            1,
            2,
        );
        cfg.facilitator.enabled = false;

        let meeting = store
            .create_meeting("Rollout plan".to_string(), cfg)
            .await
            .expect("create");
        let meeting_id = meeting.id.clone();
        let orchestrator = Arc::new(MeetingOrchestrator::new(
            store.clone(),
            gateway.clone(),
            EventBus::new(),
            meeting_id.clone(),
        ));

        let runner = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.run().await }
        });

        // wait until the meeting is mid-vote
        let mut in_vote = false;
        for _ in 0..200 {
            let current = store.get_meeting(&meeting_id).await.expect("get");
            if current.state == MeetingState::RunningVote {
                in_vote = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(in_vote, "meeting never reached the vote stage");

        let before = store.get_meeting(&meeting_id).await.expect("get");
        let first_session_id = before.active_vote_session_id.clone().expect("session");

        orchestrator
            .post_user_message("stop, consider budget")
            .await
            .expect("interrupt");
        gateway.release_votes();

        runner.await.expect("join").expect("run");

        // the interrupted session is aborted and kept no votes
        let session = store
            .get_vote_session(&meeting_id, &first_session_id)
            .await
            .expect("session");
        assert_eq!(session.status, VoteSessionStatus::Aborted);
        let session_votes: Vec<Vote> = store
            .votes_snapshot()
            .into_iter()
            .filter(|v| v.vote_session_id == first_session_id)
            .collect();
        assert!(session_votes.is_empty(), "stale votes were persisted");

        // the interrupt lifted the stage version past the session's
        let after = store.get_meeting(&meeting_id).await.expect("get");
        assert!(after.stage_version > session.stage_version);

        // the user message reached the next round's discussion prompts
        let discussion_prompts: Vec<String> = gateway
            .calls_snapshot()
            .into_iter()
            .filter(|r| r.response_format == ResponseFormat::Text)
            .flat_map(|r| r.messages.into_iter().map(|m| m.content))
            .collect();
        assert!(
            discussion_prompts
                .iter()
                .any(|p| p.contains("stop, consider budget")),
            "user message never surfaced in later prompts"
        );
    }

    #[tokio::test]
    async fn broken_facilitator_output_skips_the_summary_message() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        let mut cfg = config(
            vec![
                agent("alice", "mock-neutral"),
                agent("bob", "mock-neutral"),
                agent("carol", "mock-neutral"),
            ],
            2,
            2,
        );
        cfg.facilitator.provider = Some("mock".to_string());
        cfg.facilitator.model = Some("mock-broken-json".to_string());

        let meeting =
            run_to_completion(store.clone(), gateway, "Rollout plan", cfg).await;
        assert_eq!(meeting.state, MeetingState::FinishedAborted);

        let facilitator_messages: Vec<Message> = store
            .messages_snapshot()
            .into_iter()
            .filter(|m| m.system_sender == Some(SystemSender::Facilitator))
            .collect();
        assert!(
            facilitator_messages.is_empty(),
            "broken facilitator output still produced a message"
        );
    }

    #[tokio::test]
    async fn explicit_abort_reaches_a_terminal_state_with_result() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        gateway.hold_votes();

        let mut cfg = config(
            vec![
                agent("alice", "mock-neutral"),
                agent("bob", "mock-neutral"),
                agent("carol", "mock-neutral"),
            ],
            1,
            8,
        );
        cfg.facilitator.enabled = false;

        let meeting = store
            .create_meeting("Rollout plan".to_string(), cfg)
            .await
            .expect("create");
        let meeting_id = meeting.id.clone();
        let orchestrator = Arc::new(MeetingOrchestrator::new(
            store.clone(),
            gateway.clone(),
            EventBus::new(),
            meeting_id.clone(),
        ));

        let runner = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.run().await }
        });

        for _ in 0..200 {
            let current = store.get_meeting(&meeting_id).await.expect("get");
            if current.state == MeetingState::RunningVote {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        orchestrator.abort("user abort").await.expect("abort");
        runner.await.expect("join").expect("run");

        let finished = store.get_meeting(&meeting_id).await.expect("get");
        assert_eq!(finished.state, MeetingState::FinishedAborted);
        let result = finished.result.expect("result");
        assert_eq!(result.reason, "user abort");

        // invariant: no message/vote events after the terminal transition
        let events = store.events_snapshot();
        let terminal_at = events
            .iter()
            .position(|e| {
                matches!(
                    e.kind,
                    EventKind::StateChanged {
                        state: MeetingState::FinishedAborted,
                        ..
                    }
                )
            })
            .expect("terminal event");
        assert!(events[terminal_at + 1..].iter().all(|e| !matches!(
            e.kind,
            EventKind::MessageFinal { .. } | EventKind::VoteReceived { .. }
        )));
    }

    #[tokio::test]
    async fn runtime_rejects_invalid_configs_at_the_boundary() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        let runtime = MeetingRuntime::new(store.clone(), gateway);

        let too_few = config(vec![agent("alice", "mock-neutral")], 1, 2);
        let err = runtime
            .create_meeting("Rollout plan", too_few)
            .await
            .expect_err("should reject");
        assert!(matches!(err, crate::runtime::RuntimeError::Validation(_)));

        // nothing was created
        assert!(store.meetings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn runtime_drives_a_meeting_end_to_end_with_replayable_events() {
        let store = TestStore::new();
        let gateway = StyleGateway::new();
        let runtime = MeetingRuntime::new(store.clone(), gateway);

        let cfg = config(
            vec![
                agent("alice", "mock-optimist"),
                agent("bob", "mock-optimist"),
                agent("carol", "mock-optimist"),
            ],
            1,
            4,
        );
        let meeting = runtime
            .create_meeting("Rollout plan", cfg)
            .await
            .expect("create");

        let mut live = runtime.subscribe(&meeting.id);
        runtime.start_meeting(&meeting.id).await.expect("start");
        runtime.wait_for_meeting(&meeting.id).await.expect("wait");

        let finished = runtime.get_meeting(&meeting.id).await.expect("get");
        assert_eq!(finished.state, MeetingState::FinishedAccepted);

        // replay covers everything the live stream saw, gap-free
        let replayed = runtime
            .events_after(&meeting.id, None)
            .await
            .expect("events");
        assert!(!replayed.is_empty());
        let replay_ids: Vec<u64> = replayed.iter().map(|e| e.id).collect();
        assert!(replay_ids.windows(2).all(|w| w[0] < w[1]));

        let mut live_ids = Vec::new();
        while let Ok(event) = live.try_recv() {
            live_ids.push(event.id);
        }
        assert!(!live_ids.is_empty());
        for id in live_ids {
            assert!(replay_ids.contains(&id));
        }
    }
}
