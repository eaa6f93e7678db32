//! # In-memory ledger store
//!
//! Implements every port over a single state value. A transaction holds the
//! state mutex for its whole lifetime and works on a private copy that
//! replaces the shared state only on commit, so transactions are fully
//! serialized and an uncommitted one leaves no trace.
//!
//! One-shot [`FailPoint`]s let tests inject storage failures mid-transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::*;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Storage operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    InsertRating,
    InsertTransfer,
    InsertLevelHistory,
    AdjustBalance,
    SetLevel,
    Commit,
    LogOperation,
}

#[derive(Debug, Clone, Default)]
struct State {
    config: Option<SystemConfig>,
    players: BTreeMap<PlayerId, Player>,
    links: BTreeMap<PlayerId, String>,
    cycles: BTreeMap<CycleId, GameCycle>,
    limits: BTreeMap<Level, RatingLimit>,
    boundaries: BTreeMap<(CycleId, Level), LevelBoundary>,
    ratings: Vec<RatingLedgerEntry>,
    transfers: Vec<TransferLedgerEntry>,
    history: Vec<LevelHistoryEntry>,
    operations: Vec<OperationLogEntry>,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn active_cycle(&self) -> Option<GameCycle> {
        self.cycles.values().filter(|c| c.active).max_by_key(|c| c.start_time).cloned()
    }

    fn last_rating_between(&self, rater_id: PlayerId, rated_id: PlayerId) -> Option<DateTime<Utc>> {
        self.ratings
            .iter()
            .filter(|r| r.rater_id == rater_id && r.rated_id == rated_id)
            .map(|r| r.created_at)
            .max()
    }

    fn player_mut(&mut self, id: PlayerId) -> Result<&mut Player> {
        self.players.get_mut(&id).ok_or_else(|| DomainError::not_found("player", id))
    }

    fn player_by_external_id(&self, external_id: i64) -> Option<&Player> {
        self.players.values().find(|p| p.external_id == external_id)
    }

    fn config_mut(&mut self) -> Result<&mut SystemConfig> {
        self.config.as_mut().ok_or_else(|| DomainError::not_found("system config", "latest"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<std::sync::Mutex<Vec<FailPoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next occurrence of `point` fail with a persistence error.
    pub fn fail_once(&self, point: FailPoint) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).push(point);
    }

    /// Sum of all balances. Transfers must leave it unchanged.
    pub async fn total_balance(&self) -> i64 {
        self.state.lock().await.players.values().map(|p| p.balance).sum()
    }

    pub async fn rating_count(&self) -> usize {
        self.state.lock().await.ratings.len()
    }

    pub async fn transfer_count(&self) -> usize {
        self.state.lock().await.transfers.len()
    }

    pub async fn cycles(&self) -> Vec<GameCycle> {
        self.state.lock().await.cycles.values().cloned().collect()
    }

    /// Overwrites a player's balance, bypassing the ledger. Test fixtures only.
    pub async fn seed_balance(&self, id: PlayerId, balance: i64) -> Result<()> {
        self.state.lock().await.player_mut(id)?.balance = balance;
        Ok(())
    }

    /// Overwrites a player's level, bypassing recalculation. Test fixtures only.
    pub async fn seed_level(&self, id: PlayerId, level: Level) -> Result<()> {
        self.state.lock().await.player_mut(id)?.level = level;
        Ok(())
    }
}

fn trip(faults: &std::sync::Mutex<Vec<FailPoint>>, point: FailPoint) -> Result<()> {
    let mut faults = faults.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(pos) = faults.iter().position(|p| *p == point) {
        faults.remove(pos);
        return Err(DomainError::Persistence(format!("injected failure at {point:?}")));
    }
    Ok(())
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
    faults: Arc<std::sync::Mutex<Vec<FailPoint>>>,
}

impl MemoryTx {
    fn trip(&self, point: FailPoint) -> Result<()> {
        trip(&self.faults, point)
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_cycle_rollover(&mut self) -> Result<()> {
        // The state mutex already serializes every transaction.
        Ok(())
    }

    async fn active_cycle(&mut self) -> Result<Option<GameCycle>> {
        Ok(self.work.active_cycle())
    }

    async fn deactivate_cycle(&mut self, id: CycleId) -> Result<()> {
        let cycle = self.work.cycles.get_mut(&id).ok_or_else(|| DomainError::not_found("game cycle", id))?;
        cycle.active = false;
        Ok(())
    }

    async fn next_cycle_number(&mut self) -> Result<i32> {
        Ok(self.work.cycles.values().map(|c| c.cycle_number).max().unwrap_or(0) + 1)
    }

    async fn insert_cycle(&mut self, cycle: NewCycle) -> Result<GameCycle> {
        if self.work.cycles.values().any(|c| c.active) {
            return Err(DomainError::Persistence("another cycle is already active".into()));
        }
        let id = self.work.next_id();
        let cycle = GameCycle {
            id,
            cycle_number: cycle.cycle_number,
            start_time: cycle.start_time,
            end_time: cycle.end_time,
            duration_minutes: cycle.duration_minutes,
            cooldown_minutes: cycle.cooldown_minutes,
            active: true,
            level_recalculation_done: false,
        };
        self.work.cycles.insert(id, cycle.clone());
        Ok(cycle)
    }

    async fn mark_levels_recalculated(&mut self, cycle_id: CycleId) -> Result<()> {
        let cycle = self
            .work
            .cycles
            .get_mut(&cycle_id)
            .ok_or_else(|| DomainError::not_found("game cycle", cycle_id))?;
        cycle.level_recalculation_done = true;
        Ok(())
    }

    async fn upsert_level_boundary(&mut self, boundary: LevelBoundary) -> Result<()> {
        if !self.work.cycles.contains_key(&boundary.cycle_id) {
            return Err(DomainError::not_found("game cycle", boundary.cycle_id));
        }
        self.work.boundaries.insert((boundary.cycle_id, boundary.level), boundary);
        Ok(())
    }

    async fn lock_player(&mut self, id: PlayerId) -> Result<Option<Player>> {
        Ok(self.work.players.get(&id).cloned())
    }

    async fn adjust_balance(&mut self, id: PlayerId, delta: i64) -> Result<()> {
        self.trip(FailPoint::AdjustBalance)?;
        self.work.player_mut(id)?.balance += delta;
        Ok(())
    }

    async fn set_level(&mut self, id: PlayerId, level: Level) -> Result<()> {
        self.trip(FailPoint::SetLevel)?;
        self.work.player_mut(id)?.level = level;
        Ok(())
    }

    async fn rating_limit(&mut self, level: Level) -> Result<Option<RatingLimit>> {
        Ok(self.work.limits.get(&level).copied())
    }

    async fn last_rating_between(&mut self, rater_id: PlayerId, rated_id: PlayerId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.work.last_rating_between(rater_id, rated_id))
    }

    async fn count_ratings_in_cycle(&mut self, rater_id: PlayerId, cycle_id: CycleId) -> Result<i64> {
        let count = self.work.ratings.iter().filter(|r| r.rater_id == rater_id && r.cycle_id == cycle_id).count();
        Ok(count as i64)
    }

    async fn insert_rating(&mut self, entry: NewRatingEntry) -> Result<i64> {
        self.trip(FailPoint::InsertRating)?;
        let id = self.work.next_id();
        self.work.ratings.push(RatingLedgerEntry {
            id,
            rater_id: entry.rater_id,
            rated_id: entry.rated_id,
            kind: entry.kind,
            delta: entry.delta,
            cycle_id: entry.cycle_id,
            created_at: entry.created_at,
        });
        Ok(id)
    }

    async fn insert_transfer(&mut self, entry: NewTransferEntry) -> Result<i64> {
        self.trip(FailPoint::InsertTransfer)?;
        let id = self.work.next_id();
        self.work.transfers.push(TransferLedgerEntry {
            id,
            sender_id: entry.sender_id,
            receiver_id: entry.receiver_id,
            amount: entry.amount,
            cycle_id: entry.cycle_id,
            description: entry.description,
            created_at: entry.created_at,
        });
        Ok(id)
    }

    async fn insert_level_history(&mut self, entry: NewLevelHistory) -> Result<i64> {
        self.trip(FailPoint::InsertLevelHistory)?;
        let id = self.work.next_id();
        self.work.history.push(LevelHistoryEntry {
            id,
            player_id: entry.player_id,
            old_level: entry.old_level,
            new_level: entry.new_level,
            old_rating: entry.old_rating,
            new_rating: entry.new_rating,
            cycle_id: entry.cycle_id,
            created_at: entry.created_at,
        });
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.trip(FailPoint::Commit)?;
        let MemoryTx { mut guard, work, .. } = *self;
        *guard = work;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        trip(&self.faults, FailPoint::Begin)?;
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work, faults: self.faults.clone() }))
    }

    async fn active_cycle(&self) -> Result<Option<GameCycle>> {
        Ok(self.state.lock().await.active_cycle())
    }

    async fn cycle_by_id(&self, id: CycleId) -> Result<Option<GameCycle>> {
        Ok(self.state.lock().await.cycles.get(&id).cloned())
    }

    async fn last_rating_between(&self, rater_id: PlayerId, rated_id: PlayerId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.last_rating_between(rater_id, rated_id))
    }

    async fn ratings_received(&self, rated_id: PlayerId) -> Result<Vec<RatingLedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state.ratings.iter().filter(|r| r.rated_id == rated_id).cloned().collect())
    }

    async fn transfers_of(&self, player_id: PlayerId) -> Result<Vec<TransferLedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .transfers
            .iter()
            .filter(|t| t.sender_id == player_id || t.receiver_id == player_id)
            .cloned()
            .collect())
    }

    async fn level_history(&self, player_id: PlayerId) -> Result<Vec<LevelHistoryEntry>> {
        let state = self.state.lock().await;
        Ok(state.history.iter().filter(|h| h.player_id == player_id).cloned().collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SettingsRepo for MemoryStore {
    async fn ensure_system_config(&self, defaults: &SystemConfig) -> Result<SystemConfig> {
        let mut state = self.state.lock().await;
        Ok(*state.config.get_or_insert_with(|| {
            debug!("seeding system configuration");
            *defaults
        }))
    }

    async fn system_config(&self) -> Result<SystemConfig> {
        self.state.lock().await.config.ok_or_else(|| DomainError::not_found("system config", "latest"))
    }

    async fn update_cycle_duration(&self, minutes: i32) -> Result<()> {
        self.state.lock().await.config_mut()?.default_cycle_duration_minutes = minutes;
        Ok(())
    }

    async fn update_rating_timeout(&self, minutes: i32) -> Result<()> {
        self.state.lock().await.config_mut()?.default_rating_timeout_minutes = minutes;
        Ok(())
    }

    async fn update_formula(&self, formula_a: f64, formula_b: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        let config = state.config_mut()?;
        config.formula_a = formula_a;
        config.formula_b = formula_b;
        Ok(())
    }

    async fn upsert_rating_limit(&self, limit: RatingLimit) -> Result<()> {
        self.state.lock().await.limits.insert(limit.level, limit);
        Ok(())
    }

    async fn rating_limit(&self, level: Level) -> Result<Option<RatingLimit>> {
        Ok(self.state.lock().await.limits.get(&level).copied())
    }

    async fn level_boundaries(&self, cycle_id: CycleId) -> Result<Vec<LevelBoundary>> {
        let state = self.state.lock().await;
        Ok(state.boundaries.values().filter(|b| b.cycle_id == cycle_id).copied().collect())
    }
}

#[async_trait]
impl PlayerRepo for MemoryStore {
    async fn create_player(&self, player: NewPlayer) -> Result<Player> {
        let mut state = self.state.lock().await;
        if state.player_by_external_id(player.external_id).is_some() {
            return Err(DomainError::Persistence(format!(
                "duplicate external id {}",
                player.external_id
            )));
        }
        let id = state.next_id();
        let player = Player {
            id,
            external_id: player.external_id,
            username: player.username,
            full_name: player.full_name,
            role: Role::Player,
            level: Level::FIRST,
            balance: 0,
            created_at: Utc::now(),
        };
        state.players.insert(id, player.clone());
        Ok(player)
    }

    async fn player_by_id(&self, id: PlayerId) -> Result<Option<Player>> {
        Ok(self.state.lock().await.players.get(&id).cloned())
    }

    async fn player_by_external_id(&self, external_id: i64) -> Result<Option<Player>> {
        Ok(self.state.lock().await.player_by_external_id(external_id).cloned())
    }

    async fn player_by_link(&self, link_hash: &str) -> Result<Option<Player>> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .iter()
            .find(|(_, hash)| hash.as_str() == link_hash)
            .and_then(|(id, _)| state.players.get(id))
            .cloned())
    }

    async fn update_profile(&self, external_id: i64, full_name: &str, role: Role) -> Result<()> {
        let mut state = self.state.lock().await;
        let player = state
            .players
            .values_mut()
            .find(|p| p.external_id == external_id)
            .ok_or_else(|| DomainError::not_found("player", external_id))?;
        player.full_name = full_name.to_owned();
        player.role = role;
        Ok(())
    }

    async fn set_role(&self, external_id: i64, role: Role) -> Result<()> {
        let mut state = self.state.lock().await;
        let player = state
            .players
            .values_mut()
            .find(|p| p.external_id == external_id)
            .ok_or_else(|| DomainError::not_found("player", external_id))?;
        player.role = role;
        Ok(())
    }

    async fn player_link(&self, player_id: PlayerId) -> Result<Option<String>> {
        Ok(self.state.lock().await.links.get(&player_id).cloned())
    }

    async fn upsert_player_link(&self, player_id: PlayerId, link_hash: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.players.contains_key(&player_id) {
            return Err(DomainError::not_found("player", player_id));
        }
        state.links.insert(player_id, link_hash.to_owned());
        Ok(())
    }

    async fn list_player_ids(&self) -> Result<Vec<PlayerId>> {
        Ok(self.state.lock().await.players.keys().copied().collect())
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn log_operation(&self, entry: NewOperationLog) -> Result<()> {
        trip(&self.faults, FailPoint::LogOperation)?;
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.operations.push(OperationLogEntry {
            id,
            operation_type: entry.operation_type,
            initiator_id: entry.initiator_id,
            target_id: entry.target_id,
            details: entry.details,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn recent_operations(&self, limit: usize) -> Result<Vec<OperationLogEntry>> {
        let state = self.state.lock().await;
        Ok(state.operations.iter().rev().take(limit).cloned().collect())
    }
}
