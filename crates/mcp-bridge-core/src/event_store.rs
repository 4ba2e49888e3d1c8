//! Broadcast + history event store backing resumable streams.

use std::{collections::VecDeque, sync::RwLock};

use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::EventId;

/// Default history size limit (entries).
const HISTORY_ENTRIES: usize = 1024;

/// One recorded stream event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub message: Value,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    next_id: EventId,
}

/// Event store with broadcast and history support.
///
/// Essential for resumption: a reconnecting client replays everything after
/// its last seen id, then switches to live events. Ids are assigned here and
/// are strictly increasing for the life of the store.
pub struct EventStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<StoredEvent>,
    stream_id: String,
    capacity: usize,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create a new event store with the default history bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_ENTRIES)
    }

    /// Create a new event store keeping at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                next_id: EventId(1),
            }),
            sender,
            stream_id: Uuid::new_v4().to_string(),
            capacity,
        }
    }

    /// Stable identifier of the stream this store backs.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Record a message, assigning it the next event id, and fan it out to
    /// live subscribers.
    pub fn append(&self, message: Value) -> EventId {
        let event = {
            let mut inner = self.inner.write().unwrap();
            let event = StoredEvent {
                event_id: inner.next_id,
                message,
            };
            inner.next_id = inner.next_id.next();

            while inner.history.len() >= self.capacity {
                inner.history.pop_front();
            }
            inner.history.push_back(event.clone());
            event
        };

        let id = event.event_id;
        let _ = self.sender.send(event); // live listeners
        id
    }

    /// Highest id assigned so far, if any.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let inner = self.inner.read().unwrap();
        inner.history.back().map(|e| e.event_id)
    }

    /// Events recorded after `after`, oldest first.
    ///
    /// `None` replays all retained history. Events evicted from the bounded
    /// history are gone; resumption over evicted ranges is best-effort.
    #[must_use]
    pub fn replay_after(&self, after: Option<EventId>) -> Vec<StoredEvent> {
        let inner = self.inner.read().unwrap();
        inner
            .history
            .iter()
            .filter(|e| after.is_none_or(|id| e.event_id > id))
            .cloned()
            .collect()
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoredEvent> {
        self.sender.subscribe()
    }
}
