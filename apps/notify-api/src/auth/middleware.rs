//! Identity contract extraction.
//!
//! Authentication and authorization live upstream: the API gateway validates
//! credentials and forwards the caller's identity and precomputed team
//! memberships in trusted headers. The broker itself performs no credential
//! checks.

use std::collections::HashSet;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::AppState;

/// Header carrying the already-validated user ID.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the comma-separated set of team IDs the caller may
/// subscribe to.
pub const TEAM_IDS_HEADER: &str = "x-team-ids";

/// Authenticated caller, extracted from the gateway's identity headers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub team_ids: HashSet<String>,
}

/// Rejection returned when the identity headers are missing or malformed.
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(AuthError {
                message: "Missing X-User-Id header",
            })?
            .to_string();

        let team_ids = parts
            .headers
            .get(TEAM_IDS_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(AuthUser { user_id, team_ids })
    }
}
