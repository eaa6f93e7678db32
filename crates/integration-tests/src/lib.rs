//! Shared fixtures for the behavioural tests: an in-memory ledger driven by a
//! manual clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use domains::{Level, Player, PlayerId, PlayerRepo, SystemConfig};
use services::{Ledger, Ports};
use storage_adapters::MemoryStore;

pub use domains::ManualClock;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub ledger: Ledger,
    pub config: SystemConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(SystemConfig::default()).await
    }

    pub async fn with_config(config: SystemConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let ledger = Ledger::new(Ports::from_store(store.clone(), clock.clone()));
        let config = ledger.bootstrap(&config).await.unwrap();
        Self { store, clock, ledger, config }
    }

    /// Re-reads the stored configuration after an admin change.
    pub async fn reload_config(&mut self) {
        self.config = self.ledger.config().await.unwrap();
    }

    pub async fn player(&self, external_id: i64) -> Player {
        self.ledger.players.ensure_player(external_id, &format!("user{external_id}"), "").await.unwrap()
    }

    pub async fn player_at(&self, external_id: i64, level: i32, balance: i64) -> Player {
        let player = self.player(external_id).await;
        self.store.seed_level(player.id, Level::new(level).unwrap()).await.unwrap();
        self.store.seed_balance(player.id, balance).await.unwrap();
        self.refresh(player.id).await
    }

    pub async fn refresh(&self, id: PlayerId) -> Player {
        self.store.player_by_id(id).await.unwrap().unwrap()
    }

    pub async fn balance(&self, id: PlayerId) -> i64 {
        self.refresh(id).await.balance
    }

    pub async fn set_limit(&self, level: i32, limit: i32) {
        self.ledger.admin.set_rating_limit(None, level, limit).await.unwrap();
    }

    pub fn advance(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }

    /// The HTTP router over this harness's ledger.
    #[cfg(feature = "web-axum")]
    pub fn app(&self, admin_token: Option<&str>) -> axum::Router {
        let state = api_adapters::http::AppState::new(self.ledger.clone(), admin_token.map(str::to_owned));
        api_adapters::http::router(state, std::time::Duration::from_secs(5))
    }
}

#[cfg(feature = "web-axum")]
pub mod http {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    pub fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    pub fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Sends one request and returns the status with the body parsed as JSON
    /// (or as a JSON string when it is not JSON).
    pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), 1024 * 1024).await.unwrap();
        if bytes.is_empty() {
            return (status, Value::Null);
        }
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }
}
