//! # Core Traits (Ports)
//!
//! Storage adapters implement these traits; services only ever talk to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::*;

/// Player records and identity lookups.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PlayerRepo: Send + Sync {
    async fn create_player(&self, player: NewPlayer) -> Result<Player>;
    async fn player_by_id(&self, id: PlayerId) -> Result<Option<Player>>;
    async fn player_by_external_id(&self, external_id: i64) -> Result<Option<Player>>;
    async fn player_by_link(&self, link_hash: &str) -> Result<Option<Player>>;

    /// Fails with `NotFound` when no player has this external id.
    async fn update_profile(&self, external_id: i64, full_name: &str, role: Role) -> Result<()>;
    /// Fails with `NotFound` when no player has this external id.
    async fn set_role(&self, external_id: i64, role: Role) -> Result<()>;

    async fn player_link(&self, player_id: PlayerId) -> Result<Option<String>>;
    async fn upsert_player_link(&self, player_id: PlayerId, link_hash: &str) -> Result<()>;

    /// All player ids in ascending order.
    async fn list_player_ids(&self) -> Result<Vec<PlayerId>>;
}

/// Administrative tunables: system config, quotas, level boundaries.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SettingsRepo: Send + Sync {
    /// Inserts `defaults` if no configuration exists yet, then returns the latest row.
    async fn ensure_system_config(&self, defaults: &SystemConfig) -> Result<SystemConfig>;
    async fn system_config(&self) -> Result<SystemConfig>;
    async fn update_cycle_duration(&self, minutes: i32) -> Result<()>;
    async fn update_rating_timeout(&self, minutes: i32) -> Result<()>;
    async fn update_formula(&self, formula_a: f64, formula_b: f64) -> Result<()>;

    async fn upsert_rating_limit(&self, limit: RatingLimit) -> Result<()>;
    async fn rating_limit(&self, level: Level) -> Result<Option<RatingLimit>>;

    /// Boundaries of one cycle, ordered by level.
    async fn level_boundaries(&self, cycle_id: CycleId) -> Result<Vec<LevelBoundary>>;
}

/// Entry point to the transactional ledger plus its read accessors.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a unit of work. See [`LedgerTx`].
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    async fn active_cycle(&self) -> Result<Option<GameCycle>>;
    async fn cycle_by_id(&self, id: CycleId) -> Result<Option<GameCycle>>;
    async fn last_rating_between(&self, rater_id: PlayerId, rated_id: PlayerId) -> Result<Option<DateTime<Utc>>>;
    async fn ratings_received(&self, rated_id: PlayerId) -> Result<Vec<RatingLedgerEntry>>;
    async fn transfers_of(&self, player_id: PlayerId) -> Result<Vec<TransferLedgerEntry>>;
    async fn level_history(&self, player_id: PlayerId) -> Result<Vec<LevelHistoryEntry>>;

    /// Cheap liveness check of the backing store.
    async fn ping(&self) -> Result<()>;
}

/// A single transaction against the ledger.
///
/// Nothing is visible to other callers until [`LedgerTx::commit`] succeeds.
/// Dropping the value without committing rolls everything back, which also
/// covers cancelled futures.
#[async_trait]
pub trait LedgerTx: Send {
    /// Serializes cycle rollover across all callers until this transaction ends.
    async fn lock_cycle_rollover(&mut self) -> Result<()>;
    async fn active_cycle(&mut self) -> Result<Option<GameCycle>>;
    async fn deactivate_cycle(&mut self, id: CycleId) -> Result<()>;
    /// `max(cycle_number) + 1`, or 1 for an empty ledger.
    async fn next_cycle_number(&mut self) -> Result<i32>;
    async fn insert_cycle(&mut self, cycle: NewCycle) -> Result<GameCycle>;
    async fn mark_levels_recalculated(&mut self, cycle_id: CycleId) -> Result<()>;
    /// Inserts or replaces the boundary for `(cycle_id, level)`.
    async fn upsert_level_boundary(&mut self, boundary: LevelBoundary) -> Result<()>;

    /// Reads a player and holds its row lock until the transaction ends.
    async fn lock_player(&mut self, id: PlayerId) -> Result<Option<Player>>;
    async fn adjust_balance(&mut self, id: PlayerId, delta: i64) -> Result<()>;
    async fn set_level(&mut self, id: PlayerId, level: Level) -> Result<()>;

    async fn rating_limit(&mut self, level: Level) -> Result<Option<RatingLimit>>;
    async fn last_rating_between(&mut self, rater_id: PlayerId, rated_id: PlayerId) -> Result<Option<DateTime<Utc>>>;
    async fn count_ratings_in_cycle(&mut self, rater_id: PlayerId, cycle_id: CycleId) -> Result<i64>;

    async fn insert_rating(&mut self, entry: NewRatingEntry) -> Result<i64>;
    async fn insert_transfer(&mut self, entry: NewTransferEntry) -> Result<i64>;
    async fn insert_level_history(&mut self, entry: NewLevelHistory) -> Result<i64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Append-only audit trail.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_operation(&self, entry: NewOperationLog) -> Result<()>;
    /// Most recent entries first.
    async fn recent_operations(&self, limit: usize) -> Result<Vec<OperationLogEntry>>;
}

/// Source of "now" for cooldowns and cycle rollover.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
