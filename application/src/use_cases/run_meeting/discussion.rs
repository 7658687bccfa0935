//! Discussion rounds: the facilitator pass, serial turns and parallel
//! fan-out.

use super::{MeetingOrchestrator, RoundOutcome, RunMeetingError, generate_with_fallback};
use crate::facilitator::FacilitatorRequest;
use crate::ports::llm_gateway::{ChatMessage, GatewayError, GenerateRequest, ResponseFormat};
use crate::ports::store::MessageQuery;
use conclave_domain::{
    AgentConfig, BuiltPrompt, DiscussionContext, ErrorCode, EventKind, Meeting, Message,
    MessageMeta, MessageRole, PromptBuilder, ReplyTarget, build_proposal_text,
    select_reply_targets,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Floor for per-agent discussion call timeouts.
const DISCUSSION_TIMEOUT_FLOOR_MS: u64 = 60_000;
/// Window of messages handed to the facilitator.
const FACILITATOR_MESSAGE_WINDOW: usize = 20;

impl MeetingOrchestrator {
    /// Run one discussion round in the meeting's effective mode.
    ///
    /// Round 0 is blind: always parallel, no cross-references, topic only.
    pub(crate) async fn run_discussion_round(
        &self,
        meeting: &Meeting,
    ) -> Result<RoundOutcome, RunMeetingError> {
        let agents: Vec<AgentConfig> =
            meeting.config.enabled_agents().into_iter().cloned().collect();
        let parallel = meeting.round == 0
            || meeting.effective_discussion_mode
                == Some(conclave_domain::EffectiveDiscussionMode::ParallelRound);

        debug!(
            meeting_id = %self.meeting_id,
            round = meeting.round,
            parallel,
            agents = agents.len(),
            "running discussion round"
        );

        if parallel {
            self.parallel_round(meeting, &agents).await
        } else {
            self.serial_round(meeting, &agents).await
        }
    }

    /// Serial turns: each agent reads fresh messages, so agent `i + 1` sees
    /// agent `i`'s contribution.
    async fn serial_round(
        &self,
        meeting: &Meeting,
        agents: &[AgentConfig],
    ) -> Result<RoundOutcome, RunMeetingError> {
        let mut produced = 0usize;

        for (turn_index, agent) in agents.iter().enumerate() {
            if self.meeting_cancel.is_cancelled() {
                return Err(RunMeetingError::Cancelled);
            }

            let transcript = self
                .store
                .list_messages(MessageQuery::all(&self.meeting_id))
                .await?;
            let targets = select_reply_targets(
                &transcript,
                &agent.id,
                meeting.config.discussion.cross_reply_targets_per_agent,
            );
            let request = self.discussion_request(meeting, agent, &transcript, &targets);

            let started = Instant::now();
            match generate_with_fallback(
                self.gateway.as_ref(),
                request,
                self.meeting_cancel.clone(),
            )
            .await
            {
                Ok((reply, provenance)) => {
                    let meta = MessageMeta {
                        round: meeting.round,
                        turn_index: Some(turn_index),
                        discussion_mode: meeting.effective_discussion_mode,
                        reply_targets: targets,
                        token_usage: reply.usage,
                        latency_ms: Some(started.elapsed().as_millis() as u64),
                        provider_request_id: provenance.or(reply.request_id),
                    };
                    let message = self
                        .store
                        .append_message(Message::agent(
                            &self.meeting_id,
                            &agent.id,
                            reply.text,
                            meta,
                        ))
                        .await?;
                    self.emit(EventKind::MessageFinal { message }).await?;
                    produced += 1;
                }
                Err(err) if err.is_cancelled() => return Err(RunMeetingError::Cancelled),
                Err(err) => {
                    self.agent_failure(&agent.id, &err).await?;
                }
            }
        }

        Ok(RoundOutcome::Completed {
            agent_messages: produced,
        })
    }

    /// Parallel fan-out against a single snapshot. Results append in
    /// agent-config order; a stage-version move while agents were speaking
    /// drops the whole round.
    async fn parallel_round(
        &self,
        meeting: &Meeting,
        agents: &[AgentConfig],
    ) -> Result<RoundOutcome, RunMeetingError> {
        let snapshot = self
            .store
            .list_messages(MessageQuery::all(&self.meeting_id))
            .await?;
        let snapshot_stage = meeting.stage_version;

        type TaskResult = (
            usize,
            Vec<ReplyTarget>,
            Result<(crate::ports::llm_gateway::GenerateReply, Option<String>), GatewayError>,
            u64,
        );
        let mut join_set: JoinSet<TaskResult> = JoinSet::new();

        for (turn_index, agent) in agents.iter().enumerate() {
            let targets = if meeting.round == 0 {
                Vec::new()
            } else {
                select_reply_targets(
                    &snapshot,
                    &agent.id,
                    meeting.config.discussion.cross_reply_targets_per_agent,
                )
            };
            let request = self.discussion_request(meeting, agent, &snapshot, &targets);
            let gateway = Arc::clone(&self.gateway);
            let cancel = self.meeting_cancel.clone();

            join_set.spawn(async move {
                let started = Instant::now();
                let result = generate_with_fallback(gateway.as_ref(), request, cancel).await;
                (
                    turn_index,
                    targets,
                    result,
                    started.elapsed().as_millis() as u64,
                )
            });
        }

        // all-settled: a failing agent never takes the round down
        let mut settled: Vec<Option<TaskResult>> = (0..agents.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => {
                    let slot = outcome.0;
                    settled[slot] = Some(outcome);
                }
                Err(err) => warn!(error = %err, "discussion task join failed"),
            }
        }

        let current = self.store.get_meeting(&self.meeting_id).await?;
        if current.stage_version != snapshot_stage {
            debug!(
                meeting_id = %self.meeting_id,
                "stage version moved during parallel round; dropping all results"
            );
            return Ok(RoundOutcome::Invalidated);
        }
        if self.meeting_cancel.is_cancelled() {
            return Err(RunMeetingError::Cancelled);
        }

        let mut produced = 0usize;
        for (turn_index, slot) in settled.into_iter().enumerate() {
            let Some((_, targets, result, latency_ms)) = slot else {
                continue;
            };
            let agent = &agents[turn_index];
            match result {
                Ok((reply, provenance)) => {
                    let meta = MessageMeta {
                        round: meeting.round,
                        turn_index: Some(turn_index),
                        discussion_mode: meeting.effective_discussion_mode,
                        reply_targets: targets,
                        token_usage: reply.usage,
                        latency_ms: Some(latency_ms),
                        provider_request_id: provenance.or(reply.request_id),
                    };
                    let message = self
                        .store
                        .append_message(Message::agent(
                            &self.meeting_id,
                            &agent.id,
                            reply.text,
                            meta,
                        ))
                        .await?;
                    self.emit(EventKind::MessageFinal { message }).await?;
                    produced += 1;
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    self.agent_failure(&agent.id, &err).await?;
                }
            }
        }

        Ok(RoundOutcome::Completed {
            agent_messages: produced,
        })
    }

    /// Facilitator pass ahead of every round after the first.
    pub(crate) async fn facilitator_pass(&self, meeting: &Meeting) -> Result<(), RunMeetingError> {
        if meeting.round == 0 || !meeting.config.facilitator.enabled {
            return Ok(());
        }
        let Some((provider_id, model)) = meeting.config.facilitator_provider_model() else {
            return Ok(());
        };

        let transcript = self
            .store
            .list_messages(MessageQuery::all(&self.meeting_id))
            .await?;
        let summarized_round = meeting.round - 1;

        let recent: Vec<Message> = transcript
            .iter()
            .filter(|m| m.meta.round >= summarized_round)
            .cloned()
            .collect();
        let recent = if recent.len() > FACILITATOR_MESSAGE_WINDOW {
            recent[recent.len() - FACILITATOR_MESSAGE_WINDOW..].to_vec()
        } else {
            recent
        };

        let latest_agent_messages: Vec<&Message> = transcript
            .iter()
            .filter(|m| m.role == MessageRole::Agent && m.meta.round == summarized_round)
            .collect();
        let proposal_draft = build_proposal_text(&latest_agent_messages);
        let rolling = Self::rolling_summary(&transcript);

        let request = FacilitatorRequest {
            topic: &meeting.topic,
            summarized_round,
            rolling_summary: rolling.as_deref(),
            recent_messages: &recent,
            proposal_draft: &proposal_draft,
            provider_id: &provider_id,
            model: &model,
            config: &meeting.config.facilitator,
        };

        match self
            .facilitator
            .invoke(request, self.meeting_cancel.clone())
            .await
        {
            Ok(Some(output)) => {
                let message = Message::system(
                    &self.meeting_id,
                    conclave_domain::SystemSender::Facilitator,
                    output.to_markdown(),
                    meeting.round,
                );
                self.store.append_message(message).await?;
                self.emit(EventKind::FacilitatorOutput {
                    stage_version: meeting.stage_version,
                    round: summarized_round,
                    output,
                })
                .await?;
            }
            Ok(None) => {
                // logged by the service; the round continues without a summary
            }
            Err(err) if err.is_cancelled() => return Err(RunMeetingError::Cancelled),
            Err(err) => {
                warn!(error = %err, "facilitator pass failed");
            }
        }

        Ok(())
    }

    /// Build one agent's discussion request from a transcript view.
    fn discussion_request(
        &self,
        meeting: &Meeting,
        agent: &AgentConfig,
        transcript: &[Message],
        targets: &[ReplyTarget],
    ) -> GenerateRequest {
        let rolling = meeting
            .config
            .discussion
            .rolling_summary_enabled
            .then(|| Self::rolling_summary(transcript))
            .flatten();
        let user_messages = Self::recent_user_messages(transcript, meeting.round);

        // Round 0 is blind: topic only
        let (transcript_view, user_view): (&[Message], &[Message]) = if meeting.round == 0 {
            (&[], &[])
        } else {
            (transcript, &user_messages)
        };

        let prompt: BuiltPrompt = PromptBuilder::discussion(&DiscussionContext {
            topic: &meeting.topic,
            round: meeting.round,
            agent_system_prompt: &agent.system_prompt,
            rolling_summary: if meeting.round == 0 { None } else { rolling.as_deref() },
            rolling_summary_max_chars: meeting.config.discussion.rolling_summary_max_chars,
            transcript: transcript_view,
            user_messages: user_view,
            reply_targets: targets,
        });

        GenerateRequest {
            provider_id: agent.provider.clone(),
            model: agent.model.clone(),
            messages: vec![
                ChatMessage::system(prompt.system),
                ChatMessage::user(prompt.user),
            ],
            temperature: agent.temperature,
            max_tokens: agent.max_output_tokens,
            timeout_ms: meeting
                .config
                .threshold
                .vote_timeout_ms
                .max(DISCUSSION_TIMEOUT_FLOOR_MS),
            response_format: ResponseFormat::Text,
            metadata: None,
        }
    }

    /// Degrade a single agent's failure to an event; the round continues.
    async fn agent_failure(
        &self,
        agent_id: &str,
        err: &GatewayError,
    ) -> Result<(), RunMeetingError> {
        warn!(agent_id, error = %err, "agent discussion call failed");
        self.emit(EventKind::Error {
            code: ErrorCode::AgentError,
            message: format!("agent {} failed: {}", agent_id, err),
            details: Some(serde_json::json!({ "agent_id": agent_id })),
        })
        .await?;
        Ok(())
    }
}
