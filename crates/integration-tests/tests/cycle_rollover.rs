use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use domains::{
    CycleId, GameCycle, LedgerStore, LedgerTx, LevelHistoryEntry, ManualClock, PlayerId, RatingLedgerEntry, RatingType,
    SystemConfig, TransferLedgerEntry,
};
use integration_tests::{start_time, Harness};
use services::{Ledger, Ports};
use storage_adapters::MemoryStore;
use tokio::sync::Notify;

#[tokio::test]
async fn first_call_opens_cycle_one_with_configured_durations() {
    let h = Harness::new().await;

    let cycle = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    assert_eq!(cycle.cycle_number, 1);
    assert!(cycle.active);
    assert!(!cycle.level_recalculation_done);
    assert_eq!(cycle.start_time, start_time());
    assert_eq!(cycle.end_time, start_time() + Duration::minutes(60));
    assert_eq!(cycle.cooldown_minutes, 10);
}

#[tokio::test]
async fn unexpired_cycle_is_reused() {
    let h = Harness::new().await;
    let first = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    h.advance(59);
    let again = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(h.store.cycles().await.len(), 1);
}

#[tokio::test]
async fn cycle_expires_exactly_at_end_time() {
    let h = Harness::new().await;
    let first = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    h.advance(60);
    let next = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    assert_ne!(first.id, next.id);
    assert_eq!(next.cycle_number, 2);
    assert_eq!(next.start_time, first.end_time);

    let cycles = h.store.cycles().await;
    assert_eq!(cycles.iter().filter(|c| c.active).count(), 1);
    assert!(!cycles.iter().find(|c| c.id == first.id).unwrap().active);
}

#[tokio::test]
async fn new_settings_apply_only_to_later_cycles() {
    let mut h = Harness::new().await;
    let first = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    h.ledger.admin.update_cycle_duration(None, 30).await.unwrap();
    h.ledger.admin.update_rating_timeout(None, 3).await.unwrap();
    h.reload_config().await;

    let still_first = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();
    assert_eq!(still_first, first);

    h.advance(60);
    let second = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();
    assert_eq!(second.duration_minutes, 30);
    assert_eq!(second.cooldown_minutes, 3);
    assert_eq!(second.end_time - second.start_time, Duration::minutes(30));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rollover_creates_exactly_one_cycle() {
    let h = Harness::new().await;
    let first = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();
    h.advance(61);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cycles = h.ledger.cycles.clone();
            let config = h.config;
            tokio::spawn(async move { cycles.ensure_active_cycle(&config).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let cycle = task.await.unwrap().unwrap();
        assert_eq!(cycle.cycle_number, first.cycle_number + 1);
        ids.push(cycle.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let cycles = h.store.cycles().await;
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles.iter().filter(|c| c.active).count(), 1);
}

#[tokio::test]
async fn long_idle_period_skips_to_a_single_fresh_cycle() {
    let h = Harness::new().await;
    h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    h.advance(60 * 24);
    let cycle = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    assert_eq!(cycle.cycle_number, 2);
    assert_eq!(cycle.start_time, start_time() + Duration::minutes(60 * 24));
}

/// Delegates to a [`MemoryStore`] but parks the next `begin()` until released.
struct HeldStore {
    inner: Arc<MemoryStore>,
    armed: AtomicBool,
    parked: Notify,
    release: Notify,
}

impl HeldStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner, armed: AtomicBool::new(false), parked: Notify::new(), release: Notify::new() }
    }
}

#[async_trait]
impl LedgerStore for HeldStore {
    async fn begin(&self) -> domains::Result<Box<dyn LedgerTx>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.release.notified().await;
        }
        self.inner.begin().await
    }

    async fn active_cycle(&self) -> domains::Result<Option<GameCycle>> {
        self.inner.active_cycle().await
    }

    async fn cycle_by_id(&self, id: CycleId) -> domains::Result<Option<GameCycle>> {
        self.inner.cycle_by_id(id).await
    }

    async fn last_rating_between(
        &self,
        rater_id: PlayerId,
        rated_id: PlayerId,
    ) -> domains::Result<Option<DateTime<Utc>>> {
        self.inner.last_rating_between(rater_id, rated_id).await
    }

    async fn ratings_received(&self, rated_id: PlayerId) -> domains::Result<Vec<RatingLedgerEntry>> {
        self.inner.ratings_received(rated_id).await
    }

    async fn transfers_of(&self, player_id: PlayerId) -> domains::Result<Vec<TransferLedgerEntry>> {
        self.inner.transfers_of(player_id).await
    }

    async fn level_history(&self, player_id: PlayerId) -> domains::Result<Vec<LevelHistoryEntry>> {
        self.inner.level_history(player_id).await
    }

    async fn ping(&self) -> domains::Result<()> {
        self.inner.ping().await
    }
}

struct HeldLedger {
    store: Arc<MemoryStore>,
    held: Arc<HeldStore>,
    clock: Arc<ManualClock>,
    ledger: Ledger,
    config: SystemConfig,
}

async fn held_ledger() -> HeldLedger {
    let store = Arc::new(MemoryStore::new());
    let held = Arc::new(HeldStore::new(store.clone()));
    let clock = Arc::new(ManualClock::new(start_time()));
    let ledger = Ledger::new(Ports {
        store: held.clone(),
        settings: store.clone(),
        players: store.clone(),
        audit: store.clone(),
        clock: clock.clone(),
    });
    let config = ledger.bootstrap(&SystemConfig::default()).await.unwrap();
    HeldLedger { store, held, clock, ledger, config }
}

impl HeldLedger {
    /// Runs `write` with its transaction held back while the cycle expires and
    /// a concurrent caller rolls it over. Returns the cycle that caller created.
    async fn race_rollover<F, T>(&self, write: F) -> (GameCycle, T)
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.held.armed.store(true, Ordering::SeqCst);
        let task = tokio::spawn(write);
        self.held.parked.notified().await;

        self.clock.advance(Duration::minutes(61));
        let next = self.ledger.cycles.ensure_active_cycle(&self.config).await.unwrap();

        self.held.release.notify_one();
        (next, task.await.unwrap())
    }
}

#[tokio::test]
async fn rating_waiting_on_a_rollover_lands_in_the_new_cycle() {
    let h = held_ledger().await;
    let rater = h.ledger.players.ensure_player(1, "rater", "").await.unwrap();
    let rated = h.ledger.players.ensure_player(2, "rated", "").await.unwrap();
    let first = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();
    h.ledger.admin.set_rating_limit(None, 1, 1).await.unwrap();

    // Uses the only quota slot of the first cycle.
    let filler = h.ledger.players.ensure_player(3, "filler", "").await.unwrap();
    h.ledger.ratings.submit_rating(rater.id, filler.id, RatingType::Like, &h.config).await.unwrap();

    let ledger = h.ledger.clone();
    let config = h.config;
    let (rater_id, rated_id) = (rater.id, rated.id);
    let (next, submitted) = h
        .race_rollover(async move { ledger.ratings.submit_rating(rater_id, rated_id, RatingType::Like, &config).await })
        .await;

    assert_ne!(next.id, first.id);
    submitted.unwrap();
    let rows = h.store.ratings_received(rated.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cycle_id, next.id);
    assert!(rows[0].created_at < next.end_time);
}

#[tokio::test]
async fn transfer_waiting_on_a_rollover_lands_in_the_new_cycle() {
    let h = held_ledger().await;
    let sender = h.ledger.players.ensure_player(1, "sender", "").await.unwrap();
    let receiver = h.ledger.players.ensure_player(2, "receiver", "").await.unwrap();
    h.store.seed_balance(sender.id, 10).await.unwrap();
    h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    let ledger = h.ledger.clone();
    let config = h.config;
    let (sender_id, receiver_id) = (sender.id, receiver.id);
    let (next, submitted) = h
        .race_rollover(async move { ledger.transfers.submit_transfer(sender_id, receiver_id, 4, None, &config).await })
        .await;

    submitted.unwrap();
    let rows = h.store.transfers_of(sender.id).await.unwrap();
    assert_eq!(rows[0].cycle_id, next.id);
    assert_eq!(h.store.cycles().await.iter().filter(|c| c.active).count(), 1);
}

#[tokio::test]
async fn boundary_waiting_on_a_rollover_attaches_to_the_new_cycle() {
    let h = held_ledger().await;
    h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    let ledger = h.ledger.clone();
    let config = h.config;
    let (next, boundary) = h
        .race_rollover(async move { ledger.admin.set_level_boundary(None, 2, 11, 20, &config).await })
        .await;

    assert_eq!(boundary.unwrap().cycle_id, next.id);
    assert_eq!(h.ledger.admin.level_boundaries(next.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn expired_cycle_is_rolled_over_by_the_ledger_write_itself() {
    let h = Harness::new().await;
    let a = h.player(1).await;
    let b = h.player(2).await;
    let first = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    h.advance(60);
    h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Like, &h.config).await.unwrap();

    let cycles = h.store.cycles().await;
    let active: Vec<_> = cycles.iter().filter(|c| c.active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].cycle_number, first.cycle_number + 1);
    assert_eq!(h.store.ratings_received(b.id).await.unwrap()[0].cycle_id, active[0].id);
}
