//! Per-poll connection state with a CAS-guarded terminal transition.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use teamline_common::id::{prefix, prefixed_ulid};

use super::event::Event;

/// Terminal outcome delivered to a parked poll request.
#[derive(Debug)]
pub enum PollOutcome {
    /// One or more events, in publish order.
    Events(Vec<Arc<Event>>),
    /// Resolved without data: timed out, replaced, or reaped.
    NoUpdate,
    /// The server is shutting down; the client should back off and retry.
    ShuttingDown,
}

/// Connection lifecycle states.
///
/// `Pending` is the only non-terminal state, and every transition out of it
/// goes through a single compare-and-swap. Exactly one of the racing callers
/// (publish, timeout, client abort, replacement, reaper, shutdown) wins; the
/// losers are no-ops, never a double resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Pending = 0,
    Delivered = 1,
    TimedOut = 2,
    Aborted = 3,
    /// Superseded by a newer registration from the same poller.
    Replaced = 4,
    /// Force-closed by the reaper safety net.
    Reaped = 5,
    /// Resolved during server shutdown.
    Closed = 6,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Delivered,
            2 => Self::TimedOut,
            3 => Self::Aborted,
            4 => Self::Replaced,
            5 => Self::Reaped,
            _ => Self::Closed,
        }
    }
}

/// One parked long-poll request.
///
/// Owned by the registry while pending; the matching `oneshot::Receiver` is
/// held by the request task awaiting resolution.
#[derive(Debug)]
pub struct Connection {
    pub connection_id: String,
    pub user_id: String,
    /// Teams this poll listens for. Empty means "all permitted teams".
    pub subscribed_teams: HashSet<String>,
    /// Teams the caller may subscribe to, precomputed by the identity layer.
    pub permitted_teams: HashSet<String>,
    /// Resume cursor supplied by the client, kept for diagnostics.
    pub last_event_id: Option<i64>,
    /// Used by the reaper to spot connections that outlived their deadline.
    pub registered_at: Instant,
    state: AtomicU8,
    tx: Mutex<Option<oneshot::Sender<PollOutcome>>>,
}

impl Connection {
    /// Create a pending connection and the receiver its poll task awaits.
    pub fn new(
        user_id: &str,
        subscribed_teams: HashSet<String>,
        permitted_teams: HashSet<String>,
        last_event_id: Option<i64>,
    ) -> (Arc<Self>, oneshot::Receiver<PollOutcome>) {
        let (tx, rx) = oneshot::channel();
        let conn = Arc::new(Self {
            connection_id: prefixed_ulid(prefix::CONNECTION),
            user_id: user_id.to_string(),
            subscribed_teams,
            permitted_teams,
            last_event_id,
            registered_at: Instant::now(),
            state: AtomicU8::new(ConnState::Pending as u8),
            tx: Mutex::new(Some(tx)),
        });
        (conn, rx)
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_pending(&self) -> bool {
        self.state() == ConnState::Pending
    }

    /// Whether this connection should receive events for `team_id`.
    pub fn wants_team(&self, team_id: &str) -> bool {
        if self.subscribed_teams.is_empty() {
            self.permitted_teams.contains(team_id)
        } else {
            self.subscribed_teams.contains(team_id)
        }
    }

    /// Whether this registration covers the same subscription as `other`.
    /// Used for replacement: a re-poll from the same client supersedes its
    /// predecessor, while polls with different team filters coexist.
    pub fn same_subscription(&self, subscribed: &HashSet<String>) -> bool {
        self.subscribed_teams == *subscribed
    }

    /// Attempt the single terminal transition `Pending → terminal`.
    ///
    /// Returns `true` if this call won the race. The outcome is written to
    /// the waiting poll task; if the receiver has already gone away (client
    /// vanished between the delivery decision and the write), the write
    /// failure is logged and swallowed — the event counts as
    /// delivered-attempted, never re-queued.
    pub fn try_resolve(&self, terminal: ConnState, outcome: PollOutcome) -> bool {
        debug_assert!(terminal != ConnState::Pending);

        if self
            .state
            .compare_exchange(
                ConnState::Pending as u8,
                terminal as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        let sender = self.tx.lock().take();
        if let Some(tx) = sender {
            if tx.send(outcome).is_err() && terminal != ConnState::Aborted {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    state = ?terminal,
                    "poll receiver dropped before outcome write"
                );
            }
        }
        true
    }
}
