//! Event bus
//!
//! In-memory fan-out of meeting events to live subscribers. Publication is
//! non-blocking: a lagging subscriber loses old events from its own channel
//! buffer but can always backfill from the store's event log, because every
//! event is appended there before it is broadcast.

use conclave_domain::MeetingEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Per-subscriber channel capacity. Slow consumers fall back to replay.
const CHANNEL_CAPACITY: usize = 256;

/// Per-meeting broadcast fan-out.
#[derive(Clone, Default)]
pub struct EventBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<MeetingEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a meeting's live events. Subscribing before the meeting
    /// starts is fine; the channel is created on first use.
    pub fn subscribe(&self, meeting_id: &str) -> broadcast::Receiver<MeetingEvent> {
        let mut channels = self.channels.lock().expect("event bus lock");
        channels
            .entry(meeting_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fan an event out to the meeting's subscribers, if any.
    pub fn publish(&self, event: &MeetingEvent) {
        let channels = self.channels.lock().expect("event bus lock");
        if let Some(sender) = channels.get(&event.meeting_id) {
            // send only fails when there are no receivers; that's fine
            let _ = sender.send(event.clone());
        }
    }
}
