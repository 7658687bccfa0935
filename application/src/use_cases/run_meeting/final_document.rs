//! Final-document drafting and the unanimity approval loop (phase 2).
//!
//! The proposal vote accepts a direction; acceptance of the meeting itself
//! requires every enabled agent to approve a drafted final result document.
//! Drafting and revision go through an editor chain (facilitator's
//! provider/model first, then the agents' providers); approval gets up to
//! three attempts before the meeting aborts with the last draft preserved.

use super::{MeetingOrchestrator, RunMeetingError};
use crate::ports::llm_gateway::{ChatMessage, GenerateRequest, ResponseFormat};
use crate::ports::store::{MeetingPatch, MessageQuery};
use chrono::Utc;
use conclave_domain::{
    ApprovalRecord, BuiltPrompt, EventKind, Meeting, MeetingState, PromptBuilder, VoteAggregate,
    VoteKind, VoteSession, VoteSessionStatus, unanimous_approval, util::truncate_str,
};
use tracing::{debug, info, warn};

/// Approval attempts before the meeting gives up.
const MAX_APPROVAL_ATTEMPTS: u32 = 3;
/// Editor calls (initial draft or one revision) before falling back.
const MAX_EDITOR_PASSES: usize = 3;
/// Floor for editor call timeouts.
const EDITOR_TIMEOUT_FLOOR_MS: u64 = 90_000;
/// Token budget for document drafting.
const EDITOR_MAX_TOKENS: u32 = 4_096;
/// Transcript window summarized for the editor.
const EDITOR_DISCUSSION_WINDOW: usize = 20;

impl MeetingOrchestrator {
    /// Phase 2: draft the final result document and run the unanimity
    /// loop. Runs while the meeting is still RUNNING_VOTE at `stage_version`;
    /// any interrupt is detected through the stage check and simply returns.
    pub(crate) async fn final_document_phase(
        &self,
        round: u32,
        stage_version: u64,
        proposal: &str,
    ) -> Result<(), RunMeetingError> {
        let meeting = self.store.get_meeting(&self.meeting_id).await?;
        let expected = meeting.config.enabled_agent_ids();

        let recent_discussion = self.recent_discussion_excerpt().await?;
        let mut draft = self
            .draft_final_document(&meeting, proposal, &recent_discussion)
            .await?;
        let mut last_approvals: Vec<ApprovalRecord> = Vec::new();

        for attempt in 1..=MAX_APPROVAL_ATTEMPTS {
            if self.meeting_cancel.is_cancelled() {
                return Err(RunMeetingError::Cancelled);
            }

            let session = {
                let _guard = self.store.lock_meeting(&self.meeting_id).await?;
                let fresh = self.store.get_meeting(&self.meeting_id).await?;
                if fresh.stage_version != stage_version {
                    return Ok(());
                }
                let session = self
                    .store
                    .create_vote_session(VoteSession::approval(
                        &self.meeting_id,
                        round,
                        stage_version,
                        draft.clone(),
                        expected.clone(),
                        attempt,
                    ))
                    .await?;
                self.store
                    .update_meeting(
                        &self.meeting_id,
                        MeetingPatch::new().active_vote_session(Some(session.id.clone())),
                    )
                    .await?;
                session
            };

            info!(
                meeting_id = %self.meeting_id,
                attempt,
                "requesting final-document approval"
            );
            self.emit(EventKind::VoteSessionStarted {
                vote_session_id: session.id.clone(),
                stage_version,
                kind: VoteKind::Approval,
                attempt: Some(attempt),
            })
            .await?;

            let votes = self.collect_votes(&session).await?;

            let fresh = self.store.get_meeting(&self.meeting_id).await?;
            if fresh.stage_version != stage_version {
                debug!(meeting_id = %self.meeting_id, "approval overtaken by an interrupt");
                return Ok(());
            }

            let aggregate = VoteAggregate::from_votes(&votes);
            last_approvals = votes.iter().map(ApprovalRecord::from_vote).collect();

            if unanimous_approval(&expected, &votes) {
                {
                    let _guard = self.store.lock_meeting(&self.meeting_id).await?;
                    let current = self.store.get_meeting(&self.meeting_id).await?;
                    if current.stage_version != stage_version {
                        return Ok(());
                    }
                    self.store
                        .finalize_vote_session(
                            &self.meeting_id,
                            &session.id,
                            VoteSessionStatus::Finalized,
                            Utc::now(),
                        )
                        .await?;
                    self.store
                        .update_meeting(
                            &self.meeting_id,
                            MeetingPatch::new().active_vote_session(None),
                        )
                        .await?;
                }
                self.emit(EventKind::VoteSessionFinal {
                    vote_session_id: session.id.clone(),
                    stage_version,
                    accepted: true,
                    avg_score: aggregate.avg_score,
                    reason: "unanimous approval".to_string(),
                    kind: VoteKind::Approval,
                })
                .await?;

                return self
                    .finish_accepted(round, stage_version, draft, last_approvals)
                    .await;
            }

            // not unanimous: record the attempt and revise
            {
                let _guard = self.store.lock_meeting(&self.meeting_id).await?;
                let current = self.store.get_meeting(&self.meeting_id).await?;
                if current.stage_version != stage_version {
                    return Ok(());
                }
                self.store
                    .finalize_vote_session(
                        &self.meeting_id,
                        &session.id,
                        VoteSessionStatus::Incomplete,
                        Utc::now(),
                    )
                    .await?;
                self.store
                    .update_meeting(
                        &self.meeting_id,
                        MeetingPatch::new().active_vote_session(None),
                    )
                    .await?;
            }
            self.emit(EventKind::VoteSessionFinal {
                vote_session_id: session.id.clone(),
                stage_version,
                accepted: false,
                avg_score: aggregate.avg_score,
                reason: format!("approval attempt {} was not unanimous", attempt),
                kind: VoteKind::Approval,
            })
            .await?;

            if attempt < MAX_APPROVAL_ATTEMPTS {
                let objections: Vec<String> = votes
                    .iter()
                    .filter(|v| !v.pass)
                    .filter_map(|v| v.rationale.clone())
                    .collect();
                if let Some(revised) = self
                    .revise_final_document(&meeting, &draft, &objections)
                    .await?
                {
                    draft = revised;
                }
            }
        }

        self.finish_aborted(
            &format!(
                "Final result document was not approved by all agents after {} attempt(s)",
                MAX_APPROVAL_ATTEMPTS
            ),
            Some(draft),
            last_approvals,
        )
        .await
    }

    /// RUNNING_VOTE → FINISHED_ACCEPTED with the full result payload.
    async fn finish_accepted(
        &self,
        round: u32,
        stage_version: u64,
        document: String,
        approvals: Vec<ApprovalRecord>,
    ) -> Result<(), RunMeetingError> {
        let updated = {
            let _guard = self.store.lock_meeting(&self.meeting_id).await?;
            let meeting = self.store.get_meeting(&self.meeting_id).await?;
            if meeting.stage_version != stage_version
                || meeting.state != MeetingState::RunningVote
            {
                return Ok(());
            }

            let result = self
                .build_result(&meeting, true, "accepted", Some(&document), &approvals)
                .await?;
            self.store
                .update_meeting(
                    &self.meeting_id,
                    MeetingPatch::new()
                        .state(MeetingState::FinishedAccepted)
                        .stage_version(stage_version + 1)
                        .active_vote_session(None)
                        .result(result),
                )
                .await?
        };

        info!(meeting_id = %self.meeting_id, round, "meeting accepted");
        self.emit_state_changed(&updated).await?;
        Ok(())
    }

    /// Produce the initial draft through the editor chain; the proposal
    /// itself is the ultimate fallback.
    async fn draft_final_document(
        &self,
        meeting: &Meeting,
        proposal: &str,
        recent_discussion: &str,
    ) -> Result<String, RunMeetingError> {
        let prompt = PromptBuilder::final_document(&meeting.topic, proposal, recent_discussion);
        Ok(self
            .run_editor(meeting, prompt)
            .await?
            .unwrap_or_else(|| proposal.to_string()))
    }

    /// Revise the draft against dissent rationales. `None` when there was
    /// nothing to revise against or every editor failed; the caller keeps
    /// the current draft.
    async fn revise_final_document(
        &self,
        meeting: &Meeting,
        draft: &str,
        objections: &[String],
    ) -> Result<Option<String>, RunMeetingError> {
        if objections.is_empty() {
            return Ok(None);
        }
        let prompt = PromptBuilder::final_document_revision(&meeting.topic, draft, objections);
        self.run_editor(meeting, prompt).await
    }

    /// Try the editor chain: the facilitator's provider/model first, then
    /// each enabled agent's provider, bounded by the pass budget.
    async fn run_editor(
        &self,
        meeting: &Meeting,
        prompt: BuiltPrompt,
    ) -> Result<Option<String>, RunMeetingError> {
        let mut candidates: Vec<(String, String)> = Vec::new();
        if let Some(primary) = meeting.config.facilitator_provider_model() {
            candidates.push(primary);
        }
        for agent in meeting.config.enabled_agents() {
            let pair = (agent.provider.clone(), agent.model.clone());
            if !candidates.contains(&pair) {
                candidates.push(pair);
            }
        }

        for (provider_id, model) in candidates.into_iter().take(MAX_EDITOR_PASSES) {
            if self.meeting_cancel.is_cancelled() {
                return Err(RunMeetingError::Cancelled);
            }

            let request = GenerateRequest {
                provider_id: provider_id.clone(),
                model,
                messages: vec![
                    ChatMessage::system(prompt.system.clone()),
                    ChatMessage::user(prompt.user.clone()),
                ],
                temperature: meeting.config.facilitator.temperature,
                max_tokens: EDITOR_MAX_TOKENS,
                timeout_ms: meeting
                    .config
                    .facilitator
                    .timeout_ms
                    .max(EDITOR_TIMEOUT_FLOOR_MS),
                response_format: ResponseFormat::Text,
                metadata: None,
            };

            match self
                .gateway
                .generate_text(request, self.meeting_cancel.clone())
                .await
            {
                Ok(reply) if !reply.text.trim().is_empty() => return Ok(Some(reply.text)),
                Ok(_) => {
                    debug!(provider = %provider_id, "editor returned an empty draft");
                }
                Err(err) if err.is_cancelled() => return Err(RunMeetingError::Cancelled),
                Err(err) => {
                    warn!(provider = %provider_id, error = %err, "editor call failed");
                }
            }
        }

        warn!(meeting_id = %self.meeting_id, "every final-document editor candidate failed");
        Ok(None)
    }

    /// Tail of the transcript, formatted for the editor prompt. The prompt
    /// builder applies the byte budget.
    async fn recent_discussion_excerpt(&self) -> Result<String, RunMeetingError> {
        let transcript = self
            .store
            .list_messages(MessageQuery::all(&self.meeting_id))
            .await?;
        let start = transcript.len().saturating_sub(EDITOR_DISCUSSION_WINDOW);
        let mut excerpt = String::new();
        for message in &transcript[start..] {
            excerpt.push_str(&format!(
                "[{}] {}\n",
                message.speaker_label(),
                truncate_str(&message.content, 800)
            ));
        }
        Ok(excerpt)
    }
}
