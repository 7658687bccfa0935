//! Vote sessions: proposal scoring (phase 1) and the shared vote-collection
//! machinery used by both phases.

use super::{MeetingOrchestrator, RunMeetingError, generate_with_fallback};
use crate::ports::llm_gateway::{ChatMessage, GenerateRequest, ResponseFormat};
use crate::ports::store::{MeetingPatch, MessageQuery};
use chrono::Utc;
use conclave_domain::{
    ErrorCode, EventKind, Meeting, MeetingState, MessageRole, PromptBuilder, Vote, VoteAggregate,
    VoteKind, VoteSession, VoteSessionStatus, build_proposal_text, parse_vote_response, threshold,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Floor for per-agent vote call timeouts.
const VOTE_TIMEOUT_FLOOR_MS: u64 = 15_000;
/// Votes are cast nearly deterministically.
const VOTE_TEMPERATURE: f32 = 0.1;

impl MeetingOrchestrator {
    /// Run the vote stage for the round that just completed. Enters
    /// RUNNING_VOTE, collects scored votes over the joined proposal, and on
    /// acceptance continues into the final-document approval loop.
    pub(crate) async fn run_vote_stage(&self, meeting: &Meeting) -> Result<(), RunMeetingError> {
        let round = meeting.round;

        // Phase 1 entry, under the store lock: transition, lift the stage
        // version and open the session at that version.
        let (session, stage_version) = {
            let _guard = self.store.lock_meeting(&self.meeting_id).await?;
            let fresh = self.store.get_meeting(&self.meeting_id).await?;
            if fresh.state != MeetingState::RunningDiscussion || fresh.round != round {
                // an interrupt or abort got here first
                return Ok(());
            }
            let stage_version = fresh.stage_version + 1;

            let transcript = self
                .store
                .list_messages(MessageQuery::all(&self.meeting_id))
                .await?;
            let round_messages: Vec<&conclave_domain::Message> = transcript
                .iter()
                .filter(|m| m.role == MessageRole::Agent && m.meta.round == round)
                .collect();
            let proposal = build_proposal_text(&round_messages);

            let session = self
                .store
                .create_vote_session(VoteSession::proposal(
                    &self.meeting_id,
                    round,
                    stage_version,
                    proposal,
                    fresh.config.enabled_agent_ids(),
                ))
                .await?;
            self.store
                .update_meeting(
                    &self.meeting_id,
                    MeetingPatch::new()
                        .state(MeetingState::RunningVote)
                        .stage_version(stage_version)
                        .active_vote_session(Some(session.id.clone())),
                )
                .await?;
            (session, stage_version)
        };

        info!(
            meeting_id = %self.meeting_id,
            round,
            stage_version,
            "entering vote stage"
        );
        self.emit(EventKind::StateChanged {
            state: MeetingState::RunningVote,
            round,
            stage_version,
        })
        .await?;
        self.emit(EventKind::VoteSessionStarted {
            vote_session_id: session.id.clone(),
            stage_version,
            kind: VoteKind::Proposal,
            attempt: None,
        })
        .await?;

        let votes = self.collect_votes(&session).await?;

        // the session only counts if the stage survived the collection
        let fresh = self.store.get_meeting(&self.meeting_id).await?;
        if fresh.stage_version != stage_version {
            debug!(meeting_id = %self.meeting_id, "vote session overtaken by an interrupt");
            return Ok(());
        }

        let aggregate = VoteAggregate::from_votes(&votes);
        let decision = threshold::evaluate(&fresh.config.threshold, round, &aggregate);

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
            let patch = if decision.accepted {
                MeetingPatch::new().active_vote_session(None)
            } else {
                MeetingPatch::new()
                    .state(MeetingState::RunningDiscussion)
                    .stage_version(stage_version + 1)
                    .round(round + 1)
                    .active_vote_session(None)
            };
            self.store.update_meeting(&self.meeting_id, patch).await?;
        }

        self.emit(EventKind::VoteSessionFinal {
            vote_session_id: session.id.clone(),
            stage_version,
            accepted: decision.accepted,
            avg_score: aggregate.avg_score,
            reason: decision.reason.clone(),
            kind: VoteKind::Proposal,
        })
        .await?;

        if decision.accepted {
            info!(
                meeting_id = %self.meeting_id,
                avg_score = ?aggregate.avg_score,
                "proposal vote accepted; drafting final result document"
            );
            self.final_document_phase(round, stage_version, &session.proposal_text)
                .await
        } else {
            let updated = self.store.get_meeting(&self.meeting_id).await?;
            self.emit_state_changed(&updated).await?;
            Ok(())
        }
    }

    /// Fan one vote call out per enabled agent and persist everything that
    /// survives the stage-version check. All-settled: individual failures
    /// become `AGENT_ERROR` events and are simply missing from the result.
    pub(crate) async fn collect_votes(
        &self,
        session: &VoteSession,
    ) -> Result<Vec<Vote>, RunMeetingError> {
        let meeting = self.store.get_meeting(&self.meeting_id).await?;

        let rolling = if meeting.config.discussion.rolling_summary_enabled
            && session.kind == VoteKind::Proposal
        {
            let transcript = self
                .store
                .list_messages(MessageQuery::all(&self.meeting_id))
                .await?;
            Self::rolling_summary(&transcript)
        } else {
            None
        };

        // fresh child token per session; a user interrupt cancels it
        let vote_cancel = self.meeting_cancel.child_token();
        *self.vote_cancel.lock().expect("vote token lock") = Some(vote_cancel.clone());

        let mut join_set = JoinSet::new();
        for agent in meeting.config.enabled_agents() {
            let prompt = match session.kind {
                VoteKind::Proposal => PromptBuilder::vote(
                    &agent.system_prompt,
                    &meeting.topic,
                    rolling.as_deref(),
                    &session.proposal_text,
                ),
                VoteKind::Approval => PromptBuilder::approval(
                    &agent.system_prompt,
                    &meeting.topic,
                    &session.proposal_text,
                ),
            };
            let request = GenerateRequest {
                provider_id: agent.provider.clone(),
                model: agent.model.clone(),
                messages: vec![
                    ChatMessage::system(prompt.system),
                    ChatMessage::user(prompt.user),
                ],
                temperature: VOTE_TEMPERATURE,
                max_tokens: agent.max_output_tokens,
                timeout_ms: meeting
                    .config
                    .threshold
                    .vote_timeout_ms
                    .max(VOTE_TIMEOUT_FLOOR_MS),
                response_format: ResponseFormat::JsonObject,
                metadata: None,
            };

            let gateway = Arc::clone(&self.gateway);
            let cancel = vote_cancel.clone();
            let agent_id = agent.id.clone();
            join_set.spawn(async move {
                let result = generate_with_fallback(gateway.as_ref(), request, cancel).await;
                (agent_id, result)
            });
        }

        let mut persisted = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((agent_id, result)) = joined else {
                warn!("vote task join failed");
                continue;
            };
            match result {
                Ok((reply, _provenance)) => {
                    let ballot = parse_vote_response(&reply.text);

                    // stale check immediately before the durable write
                    let current = self.store.get_meeting(&self.meeting_id).await?;
                    if current.stage_version != session.stage_version {
                        debug!(agent_id = %agent_id, "dropping stale vote");
                        continue;
                    }

                    // the store re-checks the stage atomically; a conflict
                    // means an interrupt won the race and the vote is stale
                    let vote = match self
                        .store
                        .append_vote(Vote {
                            id: String::new(),
                            meeting_id: self.meeting_id.clone(),
                            vote_session_id: session.id.clone(),
                            voter_agent_id: agent_id,
                            score: ballot.score,
                            pass: ballot.pass,
                            rationale: ballot.rationale,
                            stage_version: session.stage_version,
                            created_at: Utc::now(),
                        })
                        .await
                    {
                        Ok(vote) => vote,
                        Err(crate::ports::store::StoreError::Conflict(_)) => {
                            debug!("vote dropped by the store's stage check");
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    };
                    self.emit(EventKind::VoteReceived {
                        vote: vote.clone(),
                        kind: session.kind,
                    })
                    .await?;
                    persisted.push(vote);
                }
                Err(err) if err.is_cancelled() => {
                    // never treated as agent failure
                }
                Err(err) => {
                    warn!(agent_id = %agent_id, error = %err, "vote call failed");
                    self.emit(EventKind::Error {
                        code: ErrorCode::AgentError,
                        message: format!("vote call failed for {}: {}", agent_id, err),
                        details: Some(serde_json::json!({ "agent_id": agent_id })),
                    })
                    .await?;
                }
            }
        }

        *self.vote_cancel.lock().expect("vote token lock") = None;
        Ok(persisted)
    }
}
