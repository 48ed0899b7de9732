//! Immutable notification records fanned out to team members.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// The closed set of state changes the broker notifies about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NewMessage,
    MessageDeleted,
    ScheduleCreated,
    ScheduleUpdated,
    ScheduleDeleted,
}

/// A single notification event.
///
/// Created exactly once by [`Broker::publish`](super::Broker::publish), never
/// mutated afterwards, and shared between connections and backlog queues via
/// `Arc`. The `payload` is an opaque domain snapshot (message or schedule);
/// the broker never looks inside it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Event {
    /// Snowflake ID — strictly increasing across the process, so it doubles
    /// as the client's resume cursor.
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub team_id: String,
    pub payload: Value,
    /// Creation time, used only for age-based eviction.
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(id: i64, event_type: EventType, team_id: &str, payload: Value) -> Self {
        Self {
            id,
            event_type,
            team_id: team_id.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Whether this event was created more than `max_age` ago.
    ///
    /// Events with a timestamp in the future (clock skew) are never
    /// considered expired.
    pub fn older_than(&self, max_age: std::time::Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.created_at)
            .to_std()
            .map(|age| age > max_age)
            .unwrap_or(false)
    }
}
