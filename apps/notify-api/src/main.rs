use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notify_api::broker::{reaper, Broker};
use notify_api::config::Config;
use notify_api::AppState;
use teamline_common::SnowflakeGenerator;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let sequencer = Arc::new(SnowflakeGenerator::new(config.worker_id));
    let broker = Arc::new(Broker::new(config.broker_config(), sequencer));
    let reaper_handle = reaper::spawn(broker.clone(), config.reaper_interval());

    tracing::info!(
        poll_timeout_secs = config.poll_timeout_secs,
        max_connections = config.max_connections,
        max_connections_per_user = config.max_connections_per_user,
        "notify-api configured"
    );

    let state = AppState {
        broker: broker.clone(),
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = axum::Router::new()
        .merge(notify_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "notify-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broker, reaper_handle))
        .await
        .expect("server error");
}

/// Wait for Ctrl-C, then drain: stop the reaper and resolve every parked
/// poll with a shutdown notice before the server stops accepting.
async fn shutdown_signal(broker: Arc<Broker>, reaper: tokio::task::JoinHandle<()>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining parked polls");
    reaper.abort();
    broker.shutdown();
}
