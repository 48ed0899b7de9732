pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use broker::Broker;
use config::Config;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub config: Arc<Config>,
}
