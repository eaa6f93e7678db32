//! Request handlers. Each one reads the configuration snapshot once and
//! passes it down to the services.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use domains::{
    DomainError, GameCycle, LevelBoundary, LevelHistoryEntry, OperationLogEntry, Player, PlayerId, RatingLimit,
    RatingOutcome, RatingType, Role, SystemConfig, TransferLedgerEntry, TransferOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use services::RecalculationReport;
use tracing::debug;

use super::auth::Actor;
use super::error::ApiError;
use super::AppState;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub rater_id: PlayerId,
    pub rated_id: PlayerId,
    pub kind: RatingType,
}

pub async fn submit_rating(
    State(state): State<AppState>,
    Json(req): Json<RatingRequest>,
) -> ApiResult<(StatusCode, Json<RatingOutcome>)> {
    let result: domains::Result<RatingOutcome> = async {
        let config = state.ledger.config().await?;
        state.ledger.ratings.submit_rating(req.rater_id, req.rated_id, req.kind, &config).await
    }
    .await;
    state.metrics.observe("rating", &result);
    Ok((StatusCode::CREATED, Json(result?)))
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub sender_id: PlayerId,
    pub receiver_id: PlayerId,
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn submit_transfer(
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<(StatusCode, Json<TransferOutcome>)> {
    let result: domains::Result<TransferOutcome> = async {
        let config = state.ledger.config().await?;
        state
            .ledger
            .transfers
            .submit_transfer(req.sender_id, req.receiver_id, req.amount, req.description.as_deref(), &config)
            .await
    }
    .await;
    state.metrics.observe("transfer", &result);
    Ok((StatusCode::CREATED, Json(result?)))
}

pub async fn get_player(State(state): State<AppState>, Path(id): Path<PlayerId>) -> ApiResult<Json<Player>> {
    Ok(Json(state.ledger.players.player(id).await?))
}

pub async fn player_by_link(State(state): State<AppState>, Path(hash): Path<String>) -> ApiResult<Json<Player>> {
    Ok(Json(state.ledger.players.player_by_link(&hash).await?))
}

pub async fn player_transfers(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
) -> ApiResult<Json<Vec<TransferLedgerEntry>>> {
    Ok(Json(state.ledger.transfers.transfers_of(id).await?))
}

pub async fn player_level_history(
    State(state): State<AppState>,
    Path(id): Path<PlayerId>,
) -> ApiResult<Json<Vec<LevelHistoryEntry>>> {
    Ok(Json(state.ledger.levels.level_history(id).await?))
}

pub async fn active_cycle(State(state): State<AppState>) -> ApiResult<Json<GameCycle>> {
    let cycle = state
        .ledger
        .cycles
        .active_cycle()
        .await?
        .ok_or_else(|| DomainError::not_found("game cycle", "active"))?;
    Ok(Json(cycle))
}

#[derive(Debug, Deserialize)]
pub struct PairQuery {
    pub rater: PlayerId,
    pub rated: PlayerId,
}

#[derive(Debug, Serialize)]
pub struct LastRating {
    pub last_rated_at: Option<DateTime<Utc>>,
}

pub async fn last_rating(State(state): State<AppState>, Query(pair): Query<PairQuery>) -> ApiResult<Json<LastRating>> {
    let last_rated_at = state.ledger.ratings.last_rating_between(pair.rater, pair.rated).await?;
    debug!(rater = pair.rater, rated = pair.rated, ?last_rated_at, "last rating lookup");
    Ok(Json(LastRating { last_rated_at }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.ledger.store().ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "message": err.to_string() })),
        ),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "application/openmetrics-text; version=1.0.0; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

// ── Admin ───────────────────────────────────────────────────────────────────

pub async fn admin_config(State(state): State<AppState>) -> ApiResult<Json<SystemConfig>> {
    Ok(Json(state.ledger.config().await?))
}

#[derive(Debug, Deserialize)]
pub struct MinutesRequest {
    pub minutes: i32,
}

pub async fn update_cycle_duration(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<MinutesRequest>,
) -> ApiResult<Json<SystemConfig>> {
    state.ledger.admin.update_cycle_duration(actor, req.minutes).await?;
    Ok(Json(state.ledger.config().await?))
}

pub async fn update_rating_timeout(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<MinutesRequest>,
) -> ApiResult<Json<SystemConfig>> {
    state.ledger.admin.update_rating_timeout(actor, req.minutes).await?;
    Ok(Json(state.ledger.config().await?))
}

#[derive(Debug, Deserialize)]
pub struct FormulaRequest {
    pub formula_a: f64,
    pub formula_b: f64,
}

pub async fn update_formula(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<FormulaRequest>,
) -> ApiResult<Json<SystemConfig>> {
    state.ledger.admin.update_formula(actor, req.formula_a, req.formula_b).await?;
    Ok(Json(state.ledger.config().await?))
}

#[derive(Debug, Deserialize)]
pub struct RatingLimitRequest {
    pub level: i32,
    pub limit: i32,
}

pub async fn set_rating_limit(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<RatingLimitRequest>,
) -> ApiResult<Json<RatingLimit>> {
    Ok(Json(state.ledger.admin.set_rating_limit(actor, req.level, req.limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct BoundaryRequest {
    pub level: i32,
    pub min_rating: i64,
    pub max_rating: i64,
}

pub async fn set_level_boundary(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<BoundaryRequest>,
) -> ApiResult<Json<LevelBoundary>> {
    let config = state.ledger.config().await?;
    let boundary = state
        .ledger
        .admin
        .set_level_boundary(actor, req.level, req.min_rating, req.max_rating, &config)
        .await?;
    Ok(Json(boundary))
}

pub async fn recalculate(State(state): State<AppState>) -> ApiResult<Json<RecalculationReport>> {
    let result: domains::Result<RecalculationReport> = async {
        let config = state.ledger.config().await?;
        state.ledger.levels.apply_level_recalculation(&config).await
    }
    .await;
    state.metrics.observe("level_recalculation", &result);
    Ok(Json(result?))
}

#[derive(Debug, Deserialize)]
pub struct AddPlayerRequest {
    pub external_id: i64,
    pub full_name: String,
}

#[derive(Debug, Serialize)]
pub struct AddedPlayer {
    pub player: Player,
    pub link: String,
}

pub async fn add_player(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<AddPlayerRequest>,
) -> ApiResult<(StatusCode, Json<AddedPlayer>)> {
    let (player, link) = state.ledger.admin.add_player(actor, req.external_id, &req.full_name).await?;
    Ok((StatusCode::CREATED, Json(AddedPlayer { player, link })))
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub external_id: i64,
    pub role: Role,
}

pub async fn set_role(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<RoleRequest>,
) -> ApiResult<StatusCode> {
    state.ledger.admin.set_role(actor, req.external_id, req.role).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct OperationsQuery {
    #[serde(default = "default_operations_limit")]
    pub limit: usize,
}

fn default_operations_limit() -> usize {
    50
}

pub async fn recent_operations(
    State(state): State<AppState>,
    Query(query): Query<OperationsQuery>,
) -> ApiResult<Json<Vec<OperationLogEntry>>> {
    Ok(Json(state.ledger.auditor.recent(query.limit.min(500)).await?))
}
