//! # Postgres ledger store
//!
//! Maps the relational schema in `migrations/` onto the domain ports.
//!
//! Every [`LedgerTx`] wraps one `sqlx` transaction. `sqlx` rolls a transaction
//! back when it is dropped uncommitted, which gives the port its rollback on
//! early return and on cancellation.

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::*;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};

use rows::{db_err, CYCLE_COLUMNS, PLAYER_COLUMNS};

/// Key of the advisory lock that serializes cycle rollover.
const ROLLOVER_LOCK_KEY: i64 = 0x6c65_6467_6572;

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DomainError::Persistence(e.to_string()))?;
        info!("database migrations applied");
        Ok(())
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

fn ensure_affected(rows: u64, entity: &'static str, id: impl std::fmt::Display) -> Result<()> {
    if rows == 0 {
        return Err(DomainError::not_found(entity, id));
    }
    Ok(())
}

/// Maps a foreign-key violation to `missing`, anything else to a persistence error.
fn foreign_key_or(err: sqlx::Error, missing: impl FnOnce() -> DomainError) -> DomainError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_foreign_key_violation() {
            return missing();
        }
    }
    db_err(err)
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_cycle_rollover(&mut self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ROLLOVER_LOCK_KEY)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn active_cycle(&mut self) -> Result<Option<GameCycle>> {
        let sql = format!("SELECT {CYCLE_COLUMNS} FROM game_cycles WHERE is_active ORDER BY start_time DESC LIMIT 1");
        let row = sqlx::query(&sql).fetch_optional(&mut *self.tx).await.map_err(db_err)?;
        row.as_ref().map(rows::cycle).transpose()
    }

    async fn deactivate_cycle(&mut self, id: CycleId) -> Result<()> {
        let done = sqlx::query("UPDATE game_cycles SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        ensure_affected(done.rows_affected(), "game cycle", id)
    }

    async fn next_cycle_number(&mut self) -> Result<i32> {
        sqlx::query_scalar("SELECT COALESCE(MAX(cycle_number), 0) + 1 FROM game_cycles")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn insert_cycle(&mut self, cycle: NewCycle) -> Result<GameCycle> {
        let sql = format!(
            "INSERT INTO game_cycles (cycle_number, start_time, end_time, duration_minutes, rating_timeout_minutes, is_active) \
             VALUES ($1, $2, $3, $4, $5, TRUE) RETURNING {CYCLE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(cycle.cycle_number)
            .bind(cycle.start_time)
            .bind(cycle.end_time)
            .bind(cycle.duration_minutes)
            .bind(cycle.cooldown_minutes)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)?;
        rows::cycle(&row)
    }

    async fn mark_levels_recalculated(&mut self, cycle_id: CycleId) -> Result<()> {
        let done =
            sqlx::query("UPDATE game_cycles SET level_recalculation_done = TRUE, updated_at = NOW() WHERE id = $1")
                .bind(cycle_id)
                .execute(&mut *self.tx)
                .await
                .map_err(db_err)?;
        ensure_affected(done.rows_affected(), "game cycle", cycle_id)
    }

    async fn upsert_level_boundary(&mut self, boundary: LevelBoundary) -> Result<()> {
        sqlx::query(
            "INSERT INTO level_boundaries (game_cycle_id, level_number, min_rating, max_rating) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (game_cycle_id, level_number) \
             DO UPDATE SET min_rating = EXCLUDED.min_rating, max_rating = EXCLUDED.max_rating",
        )
        .bind(boundary.cycle_id)
        .bind(boundary.level.get())
        .bind(boundary.min_rating)
        .bind(boundary.max_rating)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| foreign_key_or(err, || DomainError::not_found("game cycle", boundary.cycle_id)))?;
        Ok(())
    }

    async fn lock_player(&mut self, id: PlayerId) -> Result<Option<Player>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *self.tx).await.map_err(db_err)?;
        row.as_ref().map(rows::player).transpose()
    }

    async fn adjust_balance(&mut self, id: PlayerId, delta: i64) -> Result<()> {
        let done = sqlx::query("UPDATE players SET current_rating = current_rating + $1, updated_at = NOW() WHERE id = $2")
            .bind(delta)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        ensure_affected(done.rows_affected(), "player", id)
    }

    async fn set_level(&mut self, id: PlayerId, level: Level) -> Result<()> {
        let done = sqlx::query("UPDATE players SET current_level = $1, updated_at = NOW() WHERE id = $2")
            .bind(level.get())
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        ensure_affected(done.rows_affected(), "player", id)
    }

    async fn rating_limit(&mut self, level: Level) -> Result<Option<RatingLimit>> {
        let row = sqlx::query("SELECT player_level, ratings_per_cycle FROM system_rating_limits WHERE player_level = $1")
            .bind(level.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::rating_limit).transpose()
    }

    async fn last_rating_between(&mut self, rater_id: PlayerId, rated_id: PlayerId) -> Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar("SELECT MAX(created_at) FROM player_ratings WHERE rater_id = $1 AND rated_id = $2")
            .bind(rater_id)
            .bind(rated_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn count_ratings_in_cycle(&mut self, rater_id: PlayerId, cycle_id: CycleId) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM player_ratings WHERE rater_id = $1 AND game_cycle_id = $2")
            .bind(rater_id)
            .bind(cycle_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn insert_rating(&mut self, entry: NewRatingEntry) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO player_ratings (rater_id, rated_id, rating_type, rating_value, game_cycle_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(entry.rater_id)
        .bind(entry.rated_id)
        .bind(entry.kind.as_str())
        .bind(entry.delta)
        .bind(entry.cycle_id)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn insert_transfer(&mut self, entry: NewTransferEntry) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO rating_transfers (sender_id, receiver_id, amount, game_cycle_id, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(entry.sender_id)
        .bind(entry.receiver_id)
        .bind(entry.amount)
        .bind(entry.cycle_id)
        .bind(&entry.description)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn insert_level_history(&mut self, entry: NewLevelHistory) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO player_level_history (player_id, old_level, new_level, old_rating, new_rating, game_cycle_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(entry.player_id)
        .bind(entry.old_level.get())
        .bind(entry.new_level.get())
        .bind(entry.old_rating)
        .bind(entry.new_rating)
        .bind(entry.cycle_id)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn active_cycle(&self) -> Result<Option<GameCycle>> {
        let sql = format!("SELECT {CYCLE_COLUMNS} FROM game_cycles WHERE is_active ORDER BY start_time DESC LIMIT 1");
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await.map_err(db_err)?;
        row.as_ref().map(rows::cycle).transpose()
    }

    async fn cycle_by_id(&self, id: CycleId) -> Result<Option<GameCycle>> {
        let sql = format!("SELECT {CYCLE_COLUMNS} FROM game_cycles WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await.map_err(db_err)?;
        row.as_ref().map(rows::cycle).transpose()
    }

    async fn last_rating_between(&self, rater_id: PlayerId, rated_id: PlayerId) -> Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar("SELECT MAX(created_at) FROM player_ratings WHERE rater_id = $1 AND rated_id = $2")
            .bind(rater_id)
            .bind(rated_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn ratings_received(&self, rated_id: PlayerId) -> Result<Vec<RatingLedgerEntry>> {
        sqlx::query(
            "SELECT id, rater_id, rated_id, rating_type, rating_value, game_cycle_id, created_at \
             FROM player_ratings WHERE rated_id = $1 ORDER BY id",
        )
        .bind(rated_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .iter()
        .map(rows::rating)
        .collect()
    }

    async fn transfers_of(&self, player_id: PlayerId) -> Result<Vec<TransferLedgerEntry>> {
        sqlx::query(
            "SELECT id, sender_id, receiver_id, amount, game_cycle_id, description, created_at \
             FROM rating_transfers WHERE sender_id = $1 OR receiver_id = $1 ORDER BY id",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .iter()
        .map(rows::transfer)
        .collect()
    }

    async fn level_history(&self, player_id: PlayerId) -> Result<Vec<LevelHistoryEntry>> {
        sqlx::query(
            "SELECT id, player_id, old_level, new_level, old_rating, new_rating, game_cycle_id, created_at \
             FROM player_level_history WHERE player_id = $1 ORDER BY id",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .iter()
        .map(rows::level_history)
        .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl SettingsRepo for PgLedgerStore {
    async fn ensure_system_config(&self, defaults: &SystemConfig) -> Result<SystemConfig> {
        let inserted = sqlx::query(
            "INSERT INTO system_config (rating_formula_a, rating_formula_b, default_cycle_duration_minutes, default_rating_timeout_minutes) \
             SELECT $1, $2, $3, $4 WHERE NOT EXISTS (SELECT 1 FROM system_config)",
        )
        .bind(defaults.formula_a)
        .bind(defaults.formula_b)
        .bind(defaults.default_cycle_duration_minutes)
        .bind(defaults.default_rating_timeout_minutes)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if inserted.rows_affected() > 0 {
            debug!("seeded system configuration");
        }
        self.system_config().await
    }

    async fn system_config(&self) -> Result<SystemConfig> {
        let row = sqlx::query(
            "SELECT rating_formula_a, rating_formula_b, default_cycle_duration_minutes, default_rating_timeout_minutes \
             FROM system_config ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => rows::system_config(&row),
            None => Err(DomainError::not_found("system config", "latest")),
        }
    }

    async fn update_cycle_duration(&self, minutes: i32) -> Result<()> {
        let done = sqlx::query(
            "UPDATE system_config SET default_cycle_duration_minutes = $1, updated_at = NOW() \
             WHERE id = (SELECT id FROM system_config ORDER BY id DESC LIMIT 1)",
        )
        .bind(minutes)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        ensure_affected(done.rows_affected(), "system config", "latest")
    }

    async fn update_rating_timeout(&self, minutes: i32) -> Result<()> {
        let done = sqlx::query(
            "UPDATE system_config SET default_rating_timeout_minutes = $1, updated_at = NOW() \
             WHERE id = (SELECT id FROM system_config ORDER BY id DESC LIMIT 1)",
        )
        .bind(minutes)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        ensure_affected(done.rows_affected(), "system config", "latest")
    }

    async fn update_formula(&self, formula_a: f64, formula_b: f64) -> Result<()> {
        let done = sqlx::query(
            "UPDATE system_config SET rating_formula_a = $1, rating_formula_b = $2, updated_at = NOW() \
             WHERE id = (SELECT id FROM system_config ORDER BY id DESC LIMIT 1)",
        )
        .bind(formula_a)
        .bind(formula_b)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        ensure_affected(done.rows_affected(), "system config", "latest")
    }

    async fn upsert_rating_limit(&self, limit: RatingLimit) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_rating_limits (player_level, ratings_per_cycle) VALUES ($1, $2) \
             ON CONFLICT (player_level) DO UPDATE SET ratings_per_cycle = EXCLUDED.ratings_per_cycle",
        )
        .bind(limit.level.get())
        .bind(limit.limit)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn rating_limit(&self, level: Level) -> Result<Option<RatingLimit>> {
        let row = sqlx::query("SELECT player_level, ratings_per_cycle FROM system_rating_limits WHERE player_level = $1")
            .bind(level.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::rating_limit).transpose()
    }

    async fn level_boundaries(&self, cycle_id: CycleId) -> Result<Vec<LevelBoundary>> {
        sqlx::query(
            "SELECT game_cycle_id, level_number, min_rating, max_rating FROM level_boundaries \
             WHERE game_cycle_id = $1 ORDER BY level_number",
        )
        .bind(cycle_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .iter()
        .map(rows::level_boundary)
        .collect()
    }
}

#[async_trait]
impl PlayerRepo for PgLedgerStore {
    async fn create_player(&self, player: NewPlayer) -> Result<Player> {
        let sql = format!(
            "INSERT INTO players (telegram_id, username, full_name) VALUES ($1, $2, $3) RETURNING {PLAYER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(player.external_id)
            .bind(&player.username)
            .bind(&player.full_name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        rows::player(&row)
    }

    async fn player_by_id(&self, id: PlayerId) -> Result<Option<Player>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await.map_err(db_err)?;
        row.as_ref().map(rows::player).transpose()
    }

    async fn player_by_external_id(&self, external_id: i64) -> Result<Option<Player>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE telegram_id = $1");
        let row = sqlx::query(&sql).bind(external_id).fetch_optional(&self.pool).await.map_err(db_err)?;
        row.as_ref().map(rows::player).transpose()
    }

    async fn player_by_link(&self, link_hash: &str) -> Result<Option<Player>> {
        let row = sqlx::query(
            "SELECT p.id, p.telegram_id, p.username, p.full_name, p.role, p.current_level, p.current_rating, p.created_at \
             FROM players p JOIN player_links l ON l.player_id = p.id WHERE l.link_hash = $1",
        )
        .bind(link_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(rows::player).transpose()
    }

    async fn update_profile(&self, external_id: i64, full_name: &str, role: Role) -> Result<()> {
        let done = sqlx::query("UPDATE players SET full_name = $1, role = $2, updated_at = NOW() WHERE telegram_id = $3")
            .bind(full_name)
            .bind(role.as_str())
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        ensure_affected(done.rows_affected(), "player", external_id)
    }

    async fn set_role(&self, external_id: i64, role: Role) -> Result<()> {
        let done = sqlx::query("UPDATE players SET role = $1, updated_at = NOW() WHERE telegram_id = $2")
            .bind(role.as_str())
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        ensure_affected(done.rows_affected(), "player", external_id)
    }

    async fn player_link(&self, player_id: PlayerId) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT link_hash FROM player_links WHERE player_id = $1")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn upsert_player_link(&self, player_id: PlayerId, link_hash: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO player_links (player_id, link_hash) VALUES ($1, $2) \
             ON CONFLICT (player_id) DO UPDATE SET link_hash = EXCLUDED.link_hash",
        )
        .bind(player_id)
        .bind(link_hash)
        .execute(&self.pool)
        .await
        .map_err(|err| foreign_key_or(err, || DomainError::not_found("player", player_id)))?;
        Ok(())
    }

    async fn list_player_ids(&self) -> Result<Vec<PlayerId>> {
        sqlx::query_scalar("SELECT id FROM players ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl AuditLog for PgLedgerStore {
    async fn log_operation(&self, entry: NewOperationLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO operations_log (operation_type, initiator_id, target_id, details) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.operation_type.as_str())
        .bind(entry.initiator_id)
        .bind(entry.target_id)
        .bind(&entry.details)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn recent_operations(&self, limit: usize) -> Result<Vec<OperationLogEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        sqlx::query(
            "SELECT id, operation_type, initiator_id, target_id, details, created_at \
             FROM operations_log ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .iter()
        .map(rows::operation)
        .collect()
    }
}
