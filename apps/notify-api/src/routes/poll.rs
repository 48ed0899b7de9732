//! The long-poll endpoint.
//!
//! A request either returns backlogged events immediately, parks until a
//! publish resolves it, or times out with `204 No Content`. Clients are
//! expected to re-issue the poll immediately on either outcome, passing the
//! highest event ID they have seen as `last_event_id`.

use std::collections::HashSet;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::AuthUser;
use crate::broker::PollReply;
use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/poll", get(poll))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PollParams {
    /// Comma-separated team filter. Absent or empty means every team the
    /// caller belongs to.
    pub team_id: Option<String>,
    /// Resume cursor: the highest event ID the client has processed. Clients
    /// must dedup by event ID — an evicted cursor replays the full backlog.
    pub last_event_id: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/v1/poll",
    tag = "Poll",
    params(PollParams),
    responses(
        (status = 200, description = "A single event (object) or several (array), in publish order"),
        (status = 204, description = "No update before the deadline; re-poll"),
        (status = 401, description = "Missing identity headers", body = ApiErrorBody),
        (status = 429, description = "Connection ceiling reached", body = ApiErrorBody),
        (status = 503, description = "Server shutting down", body = ApiErrorBody),
    ),
)]
pub async fn poll(
    AuthUser { user_id, team_ids }: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<PollParams>,
) -> Result<Response, ApiError> {
    let subscribed: HashSet<String> = params
        .team_id
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    let reply = state
        .broker
        .poll(&user_id, subscribed, team_ids, params.last_event_id)
        .await?;

    Ok(match reply {
        PollReply::Events(events) => {
            // One event is serialized directly, multiple as an array.
            let body = if events.len() == 1 {
                serde_json::to_value(events[0].as_ref()).unwrap()
            } else {
                serde_json::to_value(events.iter().map(|e| e.as_ref()).collect::<Vec<_>>())
                    .unwrap()
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        PollReply::NoUpdate => StatusCode::NO_CONTENT.into_response(),
        PollReply::ShuttingDown => return Err(ApiError::shutting_down()),
    })
}
