//! Real-time notification broker.
//!
//! Delivers "something changed" events to team members over long-held HTTP
//! requests. A publish either resolves a currently-parked poll synchronously
//! or lands in the recipient's backlog; a poll registration either drains the
//! backlog immediately or parks until publish, timeout, or client abort.
//! Best-effort by design: nothing survives a process restart.

pub mod connection;
pub mod event;
pub mod queue;
pub mod reaper;
pub mod registry;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use utoipa::ToSchema;

use teamline_common::SnowflakeGenerator;

pub use connection::{ConnState, Connection, PollOutcome};
pub use event::{Event, EventType};
pub use registry::{DeliverResult, RegisterError, SweepStats};

use registry::{ConnectionRegistry, RegisterOutcome, RegistryLimits};

/// Runtime knobs for the broker. Defaults match the documented service
/// behavior; tests shrink the timings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long a parked poll waits before resolving with "no update".
    pub poll_timeout: Duration,
    /// Global live-connection ceiling.
    pub max_connections: usize,
    /// Per-user live-connection ceiling.
    pub max_connections_per_user: usize,
    /// Per-user backlog bound.
    pub max_queue_len: usize,
    /// Backlog retention window.
    pub max_event_age: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(30),
            max_connections: 100,
            max_connections_per_user: 3,
            max_queue_len: 100,
            max_event_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Fan-out mode, selectable per publish call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Deliver to live connections, queue for everyone else. The default.
    #[default]
    Queued,
    /// Fire-and-forget: deliver only to currently-parked subscribers of the
    /// event's team. Offline members miss the update until their next state
    /// refresh.
    Broadcast,
}

/// Final answer handed to the HTTP layer for one poll.
#[derive(Debug)]
pub enum PollReply {
    Events(Vec<Arc<Event>>),
    NoUpdate,
    ShuttingDown,
}

/// What a successful registration turned into.
pub enum Registration {
    /// Backlogged events answered the poll on the spot.
    Immediate(Vec<Arc<Event>>),
    /// The poll is parked; await it via [`Broker::wait`].
    Parked(PollTicket),
}

/// Handle to a parked poll.
///
/// Dropping the ticket while the connection is still pending is the client
/// abort path: the request future was cancelled (transport gone), so the
/// connection takes its `Aborted` transition and frees the registry slot
/// synchronously. After a normal resolution the drop is a no-op.
pub struct PollTicket {
    broker: Arc<Broker>,
    conn: Arc<Connection>,
    rx: Option<oneshot::Receiver<PollOutcome>>,
}

impl PollTicket {
    /// The parked connection, mainly for tests and diagnostics.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Drop for PollTicket {
    fn drop(&mut self) {
        if self
            .conn
            .try_resolve(ConnState::Aborted, PollOutcome::NoUpdate)
        {
            self.broker.registry.remove(&self.conn);
            tracing::debug!(
                connection_id = %self.conn.connection_id,
                user_id = %self.conn.user_id,
                "poll aborted by client"
            );
        }
    }
}

/// The notification broker. Explicitly constructed and injected via
/// `AppState`; owns the connection registry, every backlog queue, and the
/// event-ID authority.
pub struct Broker {
    registry: ConnectionRegistry,
    sequencer: Arc<SnowflakeGenerator>,
    poll_timeout: Duration,
    accepting: AtomicBool,
}

impl Broker {
    pub fn new(config: BrokerConfig, sequencer: Arc<SnowflakeGenerator>) -> Self {
        Self {
            registry: ConnectionRegistry::new(RegistryLimits {
                max_connections: config.max_connections,
                max_per_user: config.max_connections_per_user,
                max_queue_len: config.max_queue_len,
                max_event_age: config.max_event_age,
            }),
            sequencer,
            poll_timeout: config.poll_timeout,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Publish one event to the given recipients and return its assigned ID.
    ///
    /// Fan-out is decided per recipient against the registry state at publish
    /// time: a live matching connection gets the event synchronously,
    /// everyone else gets it queued (under the `Queued` policy). Write
    /// failures to vanished transports are logged inside the connection and
    /// never block or re-queue.
    pub fn publish(
        &self,
        event_type: EventType,
        team_id: &str,
        payload: Value,
        affected_user_ids: &[String],
        policy: DeliveryPolicy,
    ) -> i64 {
        let id = self.sequencer.generate();
        let event = Arc::new(Event::new(id, event_type, team_id, payload));

        match policy {
            DeliveryPolicy::Broadcast => {
                let delivered = self.registry.broadcast(&event);
                tracing::debug!(event_id = id, team_id, delivered, "broadcast event");
            }
            DeliveryPolicy::Queued => {
                let mut delivered = 0;
                let mut enqueued = 0;
                for user_id in affected_user_ids {
                    match self.registry.deliver_or_enqueue(user_id, &event, true) {
                        DeliverResult::Delivered(n) => delivered += n,
                        DeliverResult::Enqueued => enqueued += 1,
                        DeliverResult::Dropped => {}
                    }
                }
                tracing::debug!(event_id = id, team_id, delivered, enqueued, "published event");
            }
        }

        id
    }

    /// Fire-and-forget delivery to every parked subscriber of `team_id`.
    pub fn broadcast_to_team(&self, team_id: &str, event_type: EventType, payload: Value) -> i64 {
        self.publish(event_type, team_id, payload, &[], DeliveryPolicy::Broadcast)
    }

    /// Register a poll: capacity checks, replacement of the caller's previous
    /// poll, immediate reply from the backlog, or park.
    pub fn register(
        self: &Arc<Self>,
        user_id: &str,
        subscribed_teams: HashSet<String>,
        permitted_teams: HashSet<String>,
        last_event_id: Option<i64>,
    ) -> Result<Registration, RegisterError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(RegisterError::ShuttingDown);
        }

        // Subscriptions outside the caller's permitted set are dropped, not
        // rejected; authorization already happened upstream.
        let subscribed: HashSet<String> = subscribed_teams
            .intersection(&permitted_teams)
            .cloned()
            .collect();

        match self
            .registry
            .register(user_id, subscribed, permitted_teams, last_event_id)?
        {
            RegisterOutcome::Immediate(events) => Ok(Registration::Immediate(events)),
            RegisterOutcome::Parked { conn, rx } => Ok(Registration::Parked(PollTicket {
                broker: self.clone(),
                conn,
                rx: Some(rx),
            })),
        }
    }

    /// Await a parked poll under the configured deadline.
    ///
    /// Timeout firing is itself a terminal transition: if the deadline and a
    /// concurrent publish race, exactly one wins the connection's CAS. When
    /// the timeout side loses it reads the delivered outcome instead, so the
    /// publish is never silently discarded.
    pub async fn wait(&self, ticket: &mut PollTicket) -> PollReply {
        let Some(mut rx) = ticket.rx.take() else {
            return PollReply::NoUpdate;
        };

        let sleep = tokio::time::sleep(self.poll_timeout);
        tokio::pin!(sleep);

        tokio::select! {
            outcome = &mut rx => reply_from(outcome),
            _ = &mut sleep => {
                if ticket
                    .conn
                    .try_resolve(ConnState::TimedOut, PollOutcome::NoUpdate)
                {
                    self.registry.remove(&ticket.conn);
                    PollReply::NoUpdate
                } else {
                    reply_from(rx.await)
                }
            }
        }
    }

    /// Register and, if parked, await — the whole long-poll lifecycle.
    pub async fn poll(
        self: &Arc<Self>,
        user_id: &str,
        subscribed_teams: HashSet<String>,
        permitted_teams: HashSet<String>,
        last_event_id: Option<i64>,
    ) -> Result<PollReply, RegisterError> {
        match self.register(user_id, subscribed_teams, permitted_teams, last_event_id)? {
            Registration::Immediate(events) => Ok(PollReply::Events(events)),
            Registration::Parked(mut ticket) => Ok(self.wait(&mut ticket).await),
        }
    }

    /// One reaper pass: stale connections are anything older than twice the
    /// poll deadline — a safety net, not the primary timeout mechanism.
    pub fn sweep(&self) -> SweepStats {
        self.registry.sweep(self.poll_timeout * 2)
    }

    /// Stop accepting registrations and resolve every outstanding poll with a
    /// shutdown notice. Returns how many were resolved.
    pub fn shutdown(&self) -> usize {
        self.accepting.store(false, Ordering::Release);
        let resolved = self.registry.shutdown();
        tracing::info!(resolved, "broker drained, outstanding polls resolved");
        resolved
    }

    // Diagnostics.

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn team_connection_count(&self, team_id: &str) -> usize {
        self.registry.count_for_team(team_id)
    }

    pub fn queued_events(&self) -> usize {
        self.registry.queued_events()
    }

    #[cfg(test)]
    fn queued_for_user(&self, user_id: &str) -> usize {
        self.registry.queued_for_user(user_id)
    }
}

fn reply_from(outcome: Result<PollOutcome, oneshot::error::RecvError>) -> PollReply {
    match outcome {
        Ok(PollOutcome::Events(events)) => PollReply::Events(events),
        // A closed channel means the resolver vanished mid-write; treat it
        // like a timeout and let the client re-poll.
        Ok(PollOutcome::NoUpdate) | Err(_) => PollReply::NoUpdate,
        Ok(PollOutcome::ShuttingDown) => PollReply::ShuttingDown,
    }
}
