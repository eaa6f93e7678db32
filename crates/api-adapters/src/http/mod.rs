//! # JSON HTTP surface (axum)
//!
//! Public ledger routes, token-guarded `/admin` routes, `/health` and `/metrics`.

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{middleware, Router};
use services::Ledger;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::LedgerMetrics;

pub use error::ApiError;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
    pub metrics: Arc<LedgerMetrics>,
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(ledger: Ledger, admin_token: Option<String>) -> Self {
        Self {
            ledger,
            metrics: Arc::new(LedgerMetrics::new()),
            admin_token: admin_token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let admin = Router::new()
        .route("/config", get(handlers::admin_config))
        .route("/config/cycle-duration", post(handlers::update_cycle_duration))
        .route("/config/rating-timeout", post(handlers::update_rating_timeout))
        .route("/config/formula", post(handlers::update_formula))
        .route("/rating-limits", post(handlers::set_rating_limit))
        .route("/level-boundaries", post(handlers::set_level_boundary))
        .route("/recalculate", post(handlers::recalculate))
        .route("/players", post(handlers::add_player))
        .route("/roles", post(handlers::set_role))
        .route("/operations", get(handlers::recent_operations))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    Router::new()
        .route("/ratings", post(handlers::submit_rating))
        .route("/ratings/last", get(handlers::last_rating))
        .route("/transfers", post(handlers::submit_transfer))
        .route("/players/{id}", get(handlers::get_player))
        .route("/players/{id}/transfers", get(handlers::player_transfers))
        .route("/players/{id}/level-history", get(handlers::player_level_history))
        .route("/links/{hash}", get(handlers::player_by_link))
        .route("/cycles/active", get(handlers::active_cycle))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .nest("/admin", admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}
