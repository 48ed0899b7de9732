//! Internal publish endpoint — the contract surface mutation services call
//! after their own transactional write commits.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::broker::{DeliveryPolicy, EventType};
use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

/// Header carrying the shared internal secret, when one is configured.
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/internal/publish", post(publish_event))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishRequest {
    pub event_type: EventType,
    pub team_id: String,
    /// Opaque domain snapshot; the broker never interprets it.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Typically all current members of the team.
    #[serde(default)]
    pub affected_user_ids: Vec<String>,
    /// Queued unless the call site explicitly accepts drop-on-disconnect
    /// semantics.
    #[serde(default)]
    pub policy: DeliveryPolicy,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublishResponse {
    pub event_id: i64,
}

#[utoipa::path(
    post,
    path = "/api/v1/internal/publish",
    tag = "Publish",
    request_body = PublishRequest,
    responses(
        (status = 202, description = "Event accepted for best-effort delivery", body = PublishResponse),
        (status = 401, description = "Missing or invalid internal token", body = ApiErrorBody),
    ),
)]
pub async fn publish_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    if let Some(expected) = &state.config.internal_token {
        let provided = headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return Err(ApiError::unauthorized("Invalid internal token"));
        }
    }

    let event_id = state.broker.publish(
        body.event_type,
        &body.team_id,
        body.payload,
        &body.affected_user_ids,
        body.policy,
    );

    Ok((StatusCode::ACCEPTED, Json(PublishResponse { event_id })))
}
