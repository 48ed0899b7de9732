//! Bounded, time-bounded backlog of undelivered events for one user.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::event::Event;

/// FIFO backlog for a user who is not currently polling.
///
/// Entries are kept in event-ID order, which is publish order: publishers
/// race on the shard lock after their IDs are assigned, so a later lock
/// winner may carry an earlier ID and is inserted behind it.
#[derive(Default)]
pub struct EventQueue {
    events: VecDeque<Arc<Event>>,
}

impl EventQueue {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append an event, keeping ID order, dropping aged entries and then the
    /// oldest entries beyond `max_len`. Returns how many events were evicted.
    pub fn push(&mut self, event: Arc<Event>, max_len: usize, max_age: Duration) -> usize {
        let mut evicted = self.prune_expired(max_age);

        let pos = self
            .events
            .iter()
            .rposition(|e| e.id < event.id)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.events.insert(pos, event);

        while self.events.len() > max_len {
            self.events.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Drain the events the client has not seen yet.
    ///
    /// - No cursor: the whole backlog (cold start).
    /// - Cursor found: the strict suffix after it; the acknowledged prefix is
    ///   discarded.
    /// - Cursor not found (evicted or never valid): fail open and return the
    ///   whole backlog — the client dedups by event ID. Favors availability
    ///   over exactness.
    pub fn take_pending(&mut self, last_event_id: Option<i64>) -> Vec<Arc<Event>> {
        if let Some(cursor) = last_event_id {
            if let Some(pos) = self.events.iter().position(|e| e.id == cursor) {
                self.events.drain(..=pos);
            }
        }
        self.events.drain(..).collect()
    }

    /// Drop entries older than `max_age`. Returns how many were removed.
    pub fn prune_expired(&mut self, max_age: Duration) -> usize {
        let mut removed = 0;
        while let Some(front) = self.events.front() {
            if front.older_than(max_age) {
                self.events.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }
}
