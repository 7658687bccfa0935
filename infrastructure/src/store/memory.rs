//! In-memory store
//!
//! Backs a single process: every table is a map behind a `std` lock (no
//! await points while held), per-meeting mutual exclusion is a lazily
//! created `tokio::sync::Mutex`, and event ids come from one process-wide
//! monotone counter.
//!
//! The store is also the last line of defense for two invariants the
//! orchestrator relies on: `stage_version` never decreases, terminal
//! meetings only ever accept `result` rewrites, and a vote whose stage
//! version no longer matches the meeting's is rejected with a conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conclave_application::ports::store::{
    EventQuery, MeetingLockGuard, MeetingPatch, MessageQuery, Store, StoreError, VoteQuery,
};
use conclave_domain::{
    EventKind, Meeting, MeetingConfig, MeetingEvent, Message, Vote, VoteSession,
    VoteSessionStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Process-local store with per-meeting locks and a monotone event log.
#[derive(Default)]
pub struct InMemoryStore {
    meetings: Mutex<HashMap<String, Meeting>>,
    /// Insertion-ordered meeting ids, for cursor listing.
    meeting_order: Mutex<Vec<String>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    votes: Mutex<HashMap<String, Vec<Vote>>>,
    sessions: Mutex<HashMap<String, Vec<VoteSession>>>,
    events: Mutex<HashMap<String, Vec<MeetingEvent>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    meeting_seq: AtomicU64,
    message_seq: AtomicU64,
    vote_seq: AtomicU64,
    session_seq: AtomicU64,
    event_seq: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next(counter: &AtomicU64, prefix: &str) -> String {
        format!("{}-{}", prefix, counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn lock_meeting(&self, meeting_id: &str) -> Result<MeetingLockGuard, StoreError> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock table");
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
        meeting.id = Self::next(&self.meeting_seq, "mtg");

        self.meetings
            .lock()
            .expect("meetings table")
            .insert(meeting.id.clone(), meeting.clone());
        self.meeting_order
            .lock()
            .expect("meeting order")
            .push(meeting.id.clone());
        Ok(meeting)
    }

    async fn get_meeting(&self, meeting_id: &str) -> Result<Meeting, StoreError> {
        self.meetings
            .lock()
            .expect("meetings table")
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
        cursor: Option<String>,
    ) -> Result<Vec<Meeting>, StoreError> {
        // snapshot the ordering first; never hold both table locks at once
        let order: Vec<String> = self.meeting_order.lock().expect("meeting order").clone();
        let meetings = self.meetings.lock().expect("meetings table");

        // newest first; the cursor names the last id the caller has seen
        let newest_first: Vec<&String> = order.iter().rev().collect();
        let start = match &cursor {
            Some(cursor_id) => match newest_first.iter().position(|id| *id == cursor_id) {
                Some(pos) => pos + 1,
                None => 0,
            },
            None => 0,
        };

        Ok(newest_first
            .into_iter()
            .skip(start)
            .take(limit)
            .filter_map(|id| meetings.get(id).cloned())
            .collect())
    }

    async fn update_meeting(
        &self,
        meeting_id: &str,
        patch: MeetingPatch,
    ) -> Result<Meeting, StoreError> {
        let mut meetings = self.meetings.lock().expect("meetings table");
        let meeting = meetings
            .get_mut(meeting_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "meeting",
                id: meeting_id.to_string(),
            })?;

        if meeting.state.is_terminal() {
            let touches_more_than_result = patch.state.is_some()
                || patch.round.is_some()
                || patch.stage_version.is_some()
                || patch.effective_discussion_mode.is_some()
                || patch.active_vote_session_id.is_some();
            if touches_more_than_result {
                return Err(StoreError::InvalidPatch(format!(
                    "meeting {} is finished; only result may be rewritten",
                    meeting_id
                )));
            }
        }

        if let Some(stage_version) = patch.stage_version {
            if stage_version < meeting.stage_version {
                return Err(StoreError::InvalidPatch(format!(
                    "stage_version must not decrease ({} -> {})",
                    meeting.stage_version, stage_version
                )));
            }
            meeting.stage_version = stage_version;
        }
        if let Some(state) = patch.state {
            if state != meeting.state && !meeting.state.can_transition_to(state) {
                return Err(StoreError::InvalidPatch(format!(
                    "illegal transition {} -> {}",
                    meeting.state, state
                )));
            }
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
        if message.id.is_empty() {
            message.id = Self::next(&self.message_seq, "msg");
        }
        self.messages
            .lock()
            .expect("messages table")
            .entry(message.meeting_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, query: MessageQuery) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().expect("messages table");
        let all = messages.get(&query.meeting_id).cloned().unwrap_or_default();

        let start = match &query.after_message_id {
            Some(after) => match all.iter().position(|m| &m.id == after) {
                Some(pos) => pos + 1,
                None => 0,
            },
            None => 0,
        };

        let window = all.into_iter().skip(start);
        Ok(match query.limit {
            Some(limit) => window.take(limit).collect(),
            None => window.collect(),
        })
    }

    async fn create_vote_session(
        &self,
        mut session: VoteSession,
    ) -> Result<VoteSession, StoreError> {
        if session.id.is_empty() {
            session.id = Self::next(&self.session_seq, "vs");
        }
        self.sessions
            .lock()
            .expect("sessions table")
            .entry(session.meeting_id.clone())
            .or_default()
            .push(session.clone());
        Ok(session)
    }

    async fn get_vote_session(
        &self,
        meeting_id: &str,
        session_id: &str,
    ) -> Result<VoteSession, StoreError> {
        self.sessions
            .lock()
            .expect("sessions table")
            .get(meeting_id)
            .and_then(|sessions| sessions.iter().find(|s| s.id == session_id))
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
        ended_at: DateTime<Utc>,
    ) -> Result<VoteSession, StoreError> {
        let mut sessions = self.sessions.lock().expect("sessions table");
        let session = sessions
            .get_mut(meeting_id)
            .and_then(|sessions| sessions.iter_mut().find(|s| s.id == session_id))
            .ok_or_else(|| StoreError::NotFound {
                entity: "vote session",
                id: session_id.to_string(),
            })?;
        session.status = status;
        session.ended_at = Some(ended_at);
        Ok(session.clone())
    }

    async fn append_vote(&self, mut vote: Vote) -> Result<Vote, StoreError> {
        // atomic stage check: stale votes are rejected, never stored
        {
            let meetings = self.meetings.lock().expect("meetings table");
            let meeting =
                meetings
                    .get(&vote.meeting_id)
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "meeting",
                        id: vote.meeting_id.clone(),
                    })?;
            if meeting.stage_version != vote.stage_version {
                return Err(StoreError::Conflict(format!(
                    "vote at stage {} but meeting is at stage {}",
                    vote.stage_version, meeting.stage_version
                )));
            }
        }

        if vote.id.is_empty() {
            vote.id = Self::next(&self.vote_seq, "vote");
        }
        self.votes
            .lock()
            .expect("votes table")
            .entry(vote.meeting_id.clone())
            .or_default()
            .push(vote.clone());
        Ok(vote)
    }

    async fn list_votes(&self, query: VoteQuery) -> Result<Vec<Vote>, StoreError> {
        let votes = self.votes.lock().expect("votes table");
        Ok(votes
            .get(&query.meeting_id)
            .map(|votes| {
                votes
                    .iter()
                    .filter(|v| {
                        query
                            .vote_session_id
                            .as_ref()
                            .is_none_or(|sid| &v.vote_session_id == sid)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_event(
        &self,
        meeting_id: &str,
        kind: EventKind,
    ) -> Result<MeetingEvent, StoreError> {
        let event = MeetingEvent {
            id: self.event_seq.fetch_add(1, Ordering::SeqCst) + 1,
            meeting_id: meeting_id.to_string(),
            at: Utc::now(),
            kind,
        };
        self.events
            .lock()
            .expect("events table")
            .entry(meeting_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(event)
    }

    async fn list_events(&self, query: EventQuery) -> Result<Vec<MeetingEvent>, StoreError> {
        let events = self.events.lock().expect("events table");
        let window = events
            .get(&query.meeting_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| query.after.is_none_or(|after| e.id > after))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(match query.limit {
            Some(limit) => window.into_iter().take(limit).collect(),
            None => window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::{
        AgentConfig, DiscussionConfig, ErrorCode, FacilitatorConfig, MeetingState, MessageMeta,
        OutputFormat, ThresholdConfig,
    };
    use std::time::Duration;

    fn config() -> MeetingConfig {
        let agent = |id: &str| AgentConfig {
            id: id.to_string(),
            display_name: id.to_string(),
            provider: "mock".to_string(),
            model: "mock-default".to_string(),
            system_prompt: String::new(),
            temperature: 0.7,
            max_output_tokens: 512,
            enabled: true,
        };
        MeetingConfig {
            agents: vec![agent("a"), agent("b"), agent("c")],
            discussion: DiscussionConfig::default(),
            facilitator: FacilitatorConfig::default(),
            threshold: ThresholdConfig::default(),
            output: OutputFormat::default(),
        }
    }

    async fn meeting(store: &InMemoryStore) -> Meeting {
        store
            .create_meeting("Rollout plan".to_string(), config())
            .await
            .expect("create")
    }

    #[tokio::test]
    async fn create_starts_in_draft_at_stage_zero() {
        let store = InMemoryStore::new();
        let meeting = meeting(&store).await;
        assert_eq!(meeting.state, MeetingState::Draft);
        assert_eq!(meeting.stage_version, 0);
        assert_eq!(meeting.round, 0);
        assert!(meeting.id.starts_with("mtg-"));
    }

    #[tokio::test]
    async fn update_applies_restricted_patch_idempotently() {
        let store = InMemoryStore::new();
        let created = meeting(&store).await;

        let patch = MeetingPatch::new()
            .state(MeetingState::RunningDiscussion)
            .stage_version(1);
        let once = store
            .update_meeting(&created.id, patch.clone())
            .await
            .expect("first");
        let twice = store
            .update_meeting(&created.id, patch)
            .await
            .expect("second");

        assert_eq!(once.state, twice.state);
        assert_eq!(once.stage_version, twice.stage_version);
    }

    #[tokio::test]
    async fn stage_version_cannot_decrease() {
        let store = InMemoryStore::new();
        let created = meeting(&store).await;
        store
            .update_meeting(&created.id, MeetingPatch::new().stage_version(5))
            .await
            .expect("raise");

        let err = store
            .update_meeting(&created.id, MeetingPatch::new().stage_version(3))
            .await
            .expect_err("lower");
        assert!(matches!(err, StoreError::InvalidPatch(_)));
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let store = InMemoryStore::new();
        let created = meeting(&store).await;

        // DRAFT cannot jump straight to a vote
        let err = store
            .update_meeting(
                &created.id,
                MeetingPatch::new().state(MeetingState::RunningVote),
            )
            .await
            .expect_err("illegal");
        assert!(matches!(err, StoreError::InvalidPatch(_)));
    }

    #[tokio::test]
    async fn finished_meetings_only_accept_result_rewrites() {
        let store = InMemoryStore::new();
        let created = meeting(&store).await;
        store
            .update_meeting(
                &created.id,
                MeetingPatch::new()
                    .state(MeetingState::FinishedAborted)
                    .stage_version(1),
            )
            .await
            .expect("finish");

        let err = store
            .update_meeting(&created.id, MeetingPatch::new().round(3))
            .await
            .expect_err("frozen");
        assert!(matches!(err, StoreError::InvalidPatch(_)));

        let result = conclave_domain::MeetingResult {
            accepted: false,
            reason: "Max rounds reached".to_string(),
            concluded_at: Utc::now(),
            report_markdown: None,
            summary: serde_json::json!({}),
        };
        assert!(
            store
                .update_meeting(&created.id, MeetingPatch::new().result(result))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn stale_votes_are_rejected_with_conflict() {
        let store = InMemoryStore::new();
        let created = meeting(&store).await;
        store
            .update_meeting(&created.id, MeetingPatch::new().stage_version(4))
            .await
            .expect("stage");

        let vote = Vote {
            id: String::new(),
            meeting_id: created.id.clone(),
            vote_session_id: "vs-1".to_string(),
            voter_agent_id: "a".to_string(),
            score: 80,
            pass: true,
            rationale: None,
            stage_version: 3, // one interrupt behind
            created_at: Utc::now(),
        };
        let err = store.append_vote(vote).await.expect_err("stale");
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn event_ids_are_monotone_across_meetings() {
        let store = InMemoryStore::new();
        let first = meeting(&store).await;
        let second = meeting(&store).await;

        let kind = || EventKind::Error {
            code: ErrorCode::AgentError,
            message: "x".to_string(),
            details: None,
        };
        let a = store.append_event(&first.id, kind()).await.expect("a");
        let b = store.append_event(&second.id, kind()).await.expect("b");
        let c = store.append_event(&first.id, kind()).await.expect("c");
        assert!(a.id < b.id && b.id < c.id);
    }

    #[tokio::test]
    async fn event_replay_honors_the_cursor() {
        let store = InMemoryStore::new();
        let created = meeting(&store).await;
        let kind = || EventKind::Error {
            code: ErrorCode::AgentError,
            message: "x".to_string(),
            details: None,
        };
        for _ in 0..5 {
            store.append_event(&created.id, kind()).await.expect("append");
        }

        let all = store
            .list_events(EventQuery {
                meeting_id: created.id.clone(),
                after: None,
                limit: None,
            })
            .await
            .expect("all");
        assert_eq!(all.len(), 5);

        let cursor = all[2].id;
        let tail = store
            .list_events(EventQuery {
                meeting_id: created.id.clone(),
                after: Some(cursor),
                limit: None,
            })
            .await
            .expect("tail");
        assert_eq!(tail.len(), 2);
        assert!(tail.iter().all(|e| e.id > cursor));
    }

    #[tokio::test]
    async fn message_listing_supports_id_cursor() {
        let store = InMemoryStore::new();
        let created = meeting(&store).await;
        for i in 0..4 {
            store
                .append_message(Message::agent(
                    &created.id,
                    "a",
                    format!("point {}", i),
                    MessageMeta::for_round(0),
                ))
                .await
                .expect("append");
        }

        let all = store
            .list_messages(MessageQuery::all(&created.id))
            .await
            .expect("all");
        assert_eq!(all.len(), 4);

        let after = all[1].id.clone();
        let tail = store
            .list_messages(MessageQuery {
                meeting_id: created.id.clone(),
                limit: None,
                after_message_id: Some(after),
            })
            .await
            .expect("tail");
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "point 2");
    }

    #[tokio::test]
    async fn meeting_lock_is_exclusive() {
        let store = InMemoryStore::new();
        let created = meeting(&store).await;

        let guard = store.lock_meeting(&created.id).await.expect("lock");
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            store.lock_meeting(&created.id),
        )
        .await;
        assert!(second.is_err(), "second lock acquired while held");

        drop(guard);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), store.lock_meeting(&created.id))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn list_meetings_pages_newest_first() {
        let store = InMemoryStore::new();
        let first = meeting(&store).await;
        let second = meeting(&store).await;
        let third = meeting(&store).await;

        let page = store.list_meetings(2, None).await.expect("page");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, third.id);
        assert_eq!(page[1].id, second.id);

        let next = store
            .list_meetings(2, Some(second.id.clone()))
            .await
            .expect("next");
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, first.id);
    }
}
