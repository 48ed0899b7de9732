use std::time::Duration;

use crate::broker::BrokerConfig;

/// Notify API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Snowflake worker ID for the event-ID sequencer.
    pub worker_id: u16,
    /// How long a poll is held open before answering "no update".
    pub poll_timeout_secs: u64,
    /// How often the reaper sweeps stale connections and aged backlogs.
    pub reaper_interval_secs: u64,
    /// Global live-connection ceiling.
    pub max_connections: usize,
    /// Per-user live-connection ceiling.
    pub max_connections_per_user: usize,
    /// Per-user backlog bound; oldest events drop first on overflow.
    pub max_queue_size: usize,
    /// Backlog retention window in seconds.
    pub event_retention_secs: u64,
    /// Shared secret required on the internal publish endpoint. Unset leaves
    /// the endpoint open (local development only).
    pub internal_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// documented defaults.
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 4003),
            worker_id: env_or("WORKER_ID", 0),
            poll_timeout_secs: env_or("POLL_TIMEOUT_SECS", 30),
            reaper_interval_secs: env_or("REAPER_INTERVAL_SECS", 30),
            max_connections: env_or("MAX_CONNECTIONS", 100),
            max_connections_per_user: env_or("MAX_CONNECTIONS_PER_USER", 3),
            max_queue_size: env_or("MAX_QUEUE_SIZE", 100),
            event_retention_secs: env_or("EVENT_RETENTION_SECS", 7 * 24 * 3600),
            internal_token: std::env::var("INTERNAL_TOKEN").ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            max_connections: self.max_connections,
            max_connections_per_user: self.max_connections_per_user,
            max_queue_len: self.max_queue_size,
            max_event_age: Duration::from_secs(self.event_retention_secs),
        }
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
