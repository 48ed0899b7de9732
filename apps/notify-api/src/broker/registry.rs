//! Per-user shards holding parked poll connections and backlog queues.
//!
//! Uses `DashMap` for shard-level concurrency and `parking_lot::Mutex` per
//! user for non-poisoning, fast locking. Keeping a user's connections and
//! backlog behind one mutex is what makes register's check-pending-then-park
//! step atomic against a concurrent publish: an event is either drained at
//! registration or delivered to the parked connection, never stranded.
//! Operations on different users never contend.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::connection::{ConnState, Connection, PollOutcome};
use super::event::Event;
use super::queue::EventQueue;

/// Resource ceilings and retention knobs, copied out of the broker config.
#[derive(Debug, Clone)]
pub struct RegistryLimits {
    /// Global live-connection ceiling.
    pub max_connections: usize,
    /// Per-user live-connection ceiling.
    pub max_per_user: usize,
    /// Per-user backlog bound; oldest entries drop on overflow.
    pub max_queue_len: usize,
    /// Backlog retention window.
    pub max_event_age: Duration,
}

/// Registration rejected without touching existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    GlobalCapacityExceeded,
    UserCapacityExceeded,
    /// The broker is draining and no longer accepts polls.
    ShuttingDown,
}

/// What `register` resolved to.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// Backlogged events were waiting; no connection was installed.
    Immediate(Vec<Arc<Event>>),
    /// The request is parked until publish, timeout, or abort.
    Parked {
        conn: Arc<Connection>,
        rx: oneshot::Receiver<PollOutcome>,
    },
}

/// Fan-out result for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverResult {
    /// Resolved this many parked connections.
    Delivered(usize),
    /// No live connection; appended to the user's backlog.
    Enqueued,
    /// No live connection and the policy forbids queuing.
    Dropped,
}

/// Counters reported by one reaper sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub reaped_connections: usize,
    pub pruned_events: usize,
    pub removed_shards: usize,
}

#[derive(Default)]
struct UserShard {
    connections: Vec<Arc<Connection>>,
    queue: EventQueue,
}

impl UserShard {
    /// Drop connections that already reached a terminal state (their owner
    /// will find nothing left to remove). `live` is decremented per removal.
    fn purge_settled(&mut self, live: &AtomicUsize) {
        self.connections.retain(|c| {
            if c.is_pending() {
                true
            } else {
                live.fetch_sub(1, Ordering::Relaxed);
                false
            }
        });
    }

    /// Resolve every pending connection that wants this event's team.
    /// Returns the number of connections delivered to.
    fn deliver(&mut self, event: &Arc<Event>, live: &AtomicUsize) -> usize {
        let mut delivered = 0;
        self.connections.retain(|c| {
            if c.wants_team(&event.team_id)
                && c.try_resolve(ConnState::Delivered, PollOutcome::Events(vec![event.clone()]))
            {
                live.fetch_sub(1, Ordering::Relaxed);
                delivered += 1;
                false
            } else {
                true
            }
        });
        delivered
    }
}

/// Shared registry of parked connections and per-user backlogs.
pub struct ConnectionRegistry {
    shards: DashMap<String, Mutex<UserShard>>,
    /// Number of connections currently held in shards.
    live: AtomicUsize,
    limits: RegistryLimits,
}

impl ConnectionRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            shards: DashMap::new(),
            live: AtomicUsize::new(0),
            limits,
        }
    }

    /// Handle one poll registration end to end, atomically for this user:
    /// capacity checks, replacement, immediate-delivery check, then park.
    pub fn register(
        &self,
        user_id: &str,
        subscribed_teams: HashSet<String>,
        permitted_teams: HashSet<String>,
        last_event_id: Option<i64>,
    ) -> Result<RegisterOutcome, RegisterError> {
        // Reserve a global slot up front so rejections never mutate shards.
        self.reserve_slot()?;

        let entry = self
            .shards
            .entry(user_id.to_string())
            .or_insert_with(|| Mutex::new(UserShard::default()));
        let mut shard = entry.lock();

        shard.purge_settled(&self.live);

        // Per-user ceiling, checked before replacement: a rejected call
        // leaves every existing connection untouched.
        let pending = shard.connections.iter().filter(|c| c.is_pending()).count();
        if pending >= self.limits.max_per_user {
            drop(shard);
            drop(entry);
            self.release_slot();
            return Err(RegisterError::UserCapacityExceeded);
        }

        // A newer poll with the same subscription supersedes its predecessor;
        // polls with different team filters coexist up to the ceiling.
        shard.connections.retain(|c| {
            if c.same_subscription(&subscribed_teams) {
                if c.try_resolve(ConnState::Replaced, PollOutcome::NoUpdate) {
                    tracing::debug!(
                        user_id,
                        connection_id = %c.connection_id,
                        "poll superseded by newer registration"
                    );
                }
                self.live.fetch_sub(1, Ordering::Relaxed);
                false
            } else {
                true
            }
        });

        // Immediate-delivery check under the shard lock a concurrent publish
        // must also take.
        shard.queue.prune_expired(self.limits.max_event_age);
        let backlog = shard.queue.take_pending(last_event_id);
        if !backlog.is_empty() {
            drop(shard);
            drop(entry);
            self.release_slot();
            return Ok(RegisterOutcome::Immediate(backlog));
        }

        let (conn, rx) = Connection::new(user_id, subscribed_teams, permitted_teams, last_event_id);
        shard.connections.push(conn.clone());
        Ok(RegisterOutcome::Parked { conn, rx })
    }

    /// Claim one global connection slot, or fail if the ceiling is reached.
    /// The slot is counted before the connection exists so racing
    /// registrations can never overshoot `max_connections`.
    fn reserve_slot(&self) -> Result<(), RegisterError> {
        let mut current = self.live.load(Ordering::Relaxed);
        loop {
            if current >= self.limits.max_connections {
                return Err(RegisterError::GlobalCapacityExceeded);
            }
            match self.live.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Give back a slot reserved by [`reserve_slot`] when registration does
    /// not end with a parked connection.
    fn release_slot(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    /// Deliver `event` to `user_id`'s parked connections, or append it to
    /// their backlog when `queue_if_offline` is set. Never both.
    pub fn deliver_or_enqueue(
        &self,
        user_id: &str,
        event: &Arc<Event>,
        queue_if_offline: bool,
    ) -> DeliverResult {
        if queue_if_offline {
            let entry = self
                .shards
                .entry(user_id.to_string())
                .or_insert_with(|| Mutex::new(UserShard::default()));
            let mut shard = entry.lock();

            let delivered = shard.deliver(event, &self.live);
            if delivered > 0 {
                return DeliverResult::Delivered(delivered);
            }

            let evicted =
                shard
                    .queue
                    .push(event.clone(), self.limits.max_queue_len, self.limits.max_event_age);
            if evicted > 0 {
                tracing::debug!(user_id, evicted, "backlog overflow, dropped oldest events");
            }
            DeliverResult::Enqueued
        } else {
            match self.shards.get(user_id) {
                Some(entry) => {
                    let mut shard = entry.lock();
                    match shard.deliver(event, &self.live) {
                        0 => DeliverResult::Dropped,
                        n => DeliverResult::Delivered(n),
                    }
                }
                None => DeliverResult::Dropped,
            }
        }
    }

    /// Deliver to every parked connection subscribed to `team_id`, with no
    /// queuing for anyone else. Returns the number of connections resolved.
    pub fn broadcast(&self, event: &Arc<Event>) -> usize {
        let mut delivered = 0;
        for entry in self.shards.iter() {
            let mut shard = entry.value().lock();
            delivered += shard.deliver(event, &self.live);
        }
        delivered
    }

    /// Remove a connection that its poll task resolved (timeout or abort).
    pub fn remove(&self, conn: &Connection) -> bool {
        if let Some(entry) = self.shards.get(&conn.user_id) {
            let mut shard = entry.lock();
            let before = shard.connections.len();
            shard
                .connections
                .retain(|c| c.connection_id != conn.connection_id);
            if shard.connections.len() < before {
                self.live.fetch_sub(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Reaper pass: force-resolve connections older than `stale_after`,
    /// prune aged backlog entries, and drop shards left empty.
    pub fn sweep(&self, stale_after: Duration) -> SweepStats {
        let mut stats = SweepStats::default();

        self.shards.retain(|user_id, slot| {
            let mut shard = slot.lock();

            shard.connections.retain(|c| {
                if !c.is_pending() {
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    return false;
                }
                if c.registered_at.elapsed() > stale_after
                    && c.try_resolve(ConnState::Reaped, PollOutcome::NoUpdate)
                {
                    tracing::warn!(
                        user_id,
                        connection_id = %c.connection_id,
                        "reaped stale connection past its deadline"
                    );
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    stats.reaped_connections += 1;
                    return false;
                }
                true
            });

            stats.pruned_events += shard.queue.prune_expired(self.limits.max_event_age);

            let keep = !shard.connections.is_empty() || !shard.queue.is_empty();
            if !keep {
                stats.removed_shards += 1;
            }
            keep
        });

        stats
    }

    /// Resolve every outstanding connection with a shutdown notice and drop
    /// all state. Returns the number of connections resolved.
    pub fn shutdown(&self) -> usize {
        let mut resolved = 0;
        self.shards.retain(|_, slot| {
            let mut shard = slot.lock();
            for c in shard.connections.drain(..) {
                if c.try_resolve(ConnState::Closed, PollOutcome::ShuttingDown) {
                    resolved += 1;
                }
                self.live.fetch_sub(1, Ordering::Relaxed);
            }
            false
        });
        resolved
    }

    /// Live-connection count (diagnostic).
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Parked connections that would receive events for `team_id`.
    pub fn count_for_team(&self, team_id: &str) -> usize {
        let mut count = 0;
        for entry in self.shards.iter() {
            let shard = entry.value().lock();
            count += shard
                .connections
                .iter()
                .filter(|c| c.is_pending() && c.wants_team(team_id))
                .count();
        }
        count
    }

    /// Total backlogged events across all users (diagnostic).
    pub fn queued_events(&self) -> usize {
        self.shards.iter().map(|e| e.value().lock().queue.len()).sum()
    }

    /// Backlog length for one user (diagnostic, used by tests).
    pub fn queued_for_user(&self, user_id: &str) -> usize {
        self.shards
            .get(user_id)
            .map(|e| e.lock().queue.len())
            .unwrap_or(0)
    }
}
