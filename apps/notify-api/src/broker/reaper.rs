//! Periodic background sweep of stale connections and aged backlogs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::Broker;

/// Spawn the reaper loop. Each tick force-resolves connections that outlived
/// twice the poll deadline (a safety net against leaked slots, not the
/// primary timeout mechanism), prunes aged backlog entries, and deletes
/// emptied queues. The sweep itself never panics; abort the handle on
/// shutdown.
pub fn spawn(broker: Arc<Broker>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // First tick fires immediately; skip it.

        loop {
            ticker.tick().await;
            let stats = broker.sweep();
            if stats.reaped_connections > 0 || stats.pruned_events > 0 || stats.removed_shards > 0
            {
                tracing::info!(
                    reaped_connections = stats.reaped_connections,
                    pruned_events = stats.pruned_events,
                    removed_queues = stats.removed_shards,
                    "reaper sweep cleaned up"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerConfig, ConnState, Registration};
    use std::collections::HashSet;
    use teamline_common::SnowflakeGenerator;

    #[tokio::test]
    async fn reaper_force_closes_abandoned_connections() {
        let broker = Arc::new(Broker::new(
            BrokerConfig {
                poll_timeout: Duration::from_millis(10),
                ..BrokerConfig::default()
            },
            Arc::new(SnowflakeGenerator::new(0)),
        ));

        let teams: HashSet<String> = ["t1".to_string()].into_iter().collect();
        let registration = broker
            .register("u1", teams.clone(), teams, None)
            .unwrap();
        let Registration::Parked(ticket) = registration else {
            panic!("expected parked registration");
        };
        // Never awaited: simulates a leaked slot the timer no longer covers.

        let handle = spawn(broker.clone(), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(broker.connection_count(), 0);
        assert_eq!(ticket.connection().state(), ConnState::Reaped);

        handle.abort();
        drop(ticket);
    }
}
