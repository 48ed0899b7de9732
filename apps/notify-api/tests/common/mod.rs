use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use notify_api::broker::{Broker, BrokerConfig};
use notify_api::config::Config;
use notify_api::AppState;
use teamline_common::SnowflakeGenerator;

/// Build an app around a broker with explicit limits/timings.
pub fn test_app_with(
    broker_config: BrokerConfig,
    internal_token: Option<&str>,
) -> (Router, AppState) {
    let config = Config {
        port: 0,
        worker_id: 0,
        poll_timeout_secs: broker_config.poll_timeout.as_secs(),
        reaper_interval_secs: 30,
        max_connections: broker_config.max_connections,
        max_connections_per_user: broker_config.max_connections_per_user,
        max_queue_size: broker_config.max_queue_len,
        event_retention_secs: broker_config.max_event_age.as_secs(),
        internal_token: internal_token.map(String::from),
    };

    let broker = Arc::new(Broker::new(
        broker_config,
        Arc::new(SnowflakeGenerator::new(0)),
    ));
    let state = AppState {
        broker,
        config: Arc::new(config),
    };

    let app = Router::new()
        .merge(notify_api::routes::router())
        .with_state(state.clone());
    (app, state)
}

/// Default test app: short poll deadline so timeout paths stay fast.
pub fn test_app() -> (Router, AppState) {
    test_app_with(
        BrokerConfig {
            poll_timeout: Duration::from_millis(200),
            ..BrokerConfig::default()
        },
        None,
    )
}
