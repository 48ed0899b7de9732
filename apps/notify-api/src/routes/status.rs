//! Diagnostic introspection. Not part of delivery correctness.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/teams/{team_id}/connections", get(team_connections))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TeamConnectionsResponse {
    pub team_id: String,
    /// Polls currently parked that would receive this team's events.
    pub connections: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/teams/{team_id}/connections",
    tag = "Status",
    params(
        ("team_id" = String, Path, description = "Team to count parked connections for"),
    ),
    responses(
        (status = 200, description = "Current parked-connection count", body = TeamConnectionsResponse),
    ),
)]
pub async fn team_connections(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> Json<TeamConnectionsResponse> {
    let connections = state.broker.team_connection_count(&team_id);
    Json(TeamConnectionsResponse {
        team_id,
        connections,
    })
}
