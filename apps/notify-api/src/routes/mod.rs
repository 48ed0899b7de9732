pub mod health;
pub mod poll;
pub mod publish;
pub mod status;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(poll::router())
        .merge(publish::router())
        .merge(status::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        poll::poll,
        publish::publish_event,
        status::team_connections,
    ),
    components(schemas(
        crate::broker::Event,
        crate::broker::EventType,
        crate::broker::DeliveryPolicy,
        crate::error::ApiErrorBody,
        crate::error::ApiErrorDetail,
        publish::PublishRequest,
        publish::PublishResponse,
        status::TeamConnectionsResponse,
    )),
    tags(
        (name = "Poll", description = "Long-poll notification delivery"),
        (name = "Publish", description = "Internal event ingestion"),
        (name = "Status", description = "Diagnostics"),
    )
)]
pub struct ApiDoc;
