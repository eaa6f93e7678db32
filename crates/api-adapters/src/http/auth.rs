//! Admin token guard and the acting-player header.

use axum::extract::{FromRequestParts, Query, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use domains::PlayerId;
use serde::Deserialize;
use tracing::warn;

use super::error::ApiError;
use super::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// Admits the request only if it carries the configured admin token, either
/// in `X-Admin-Token` or as `?token=`. With no token configured nothing passes.
pub async fn require_admin(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        warn!(path = %req.uri().path(), "admin call refused: no admin token configured");
        return Err(ApiError::Unauthorized);
    };
    let supplied = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .map(str::to_owned)
        .or(query.token);

    match supplied {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(next.run(req).await),
        _ => {
            warn!(path = %req.uri().path(), "admin call refused: bad token");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Player on whose behalf an admin action runs, from `X-Actor-Id`. Recorded in the audit log.
///
/// A named actor must be a moderator or above.
#[derive(Debug, Clone, Copy, Default)]
pub struct Actor(pub Option<PlayerId>);

impl FromRequestParts<AppState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(ACTOR_HEADER) else {
            return Ok(Actor(None));
        };
        let id = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<PlayerId>().ok())
            .ok_or_else(|| ApiError::BadRequest(format!("{ACTOR_HEADER} must be a player id")))?;

        if !state.ledger.players.is_privileged(id).await? {
            warn!(actor = id, path = %parts.uri.path(), "admin call refused: actor is not privileged");
            return Err(ApiError::Forbidden);
        }
        Ok(Actor(Some(id)))
    }
}
