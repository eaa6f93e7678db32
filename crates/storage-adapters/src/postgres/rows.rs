//! Row → domain mapping. Column names follow `migrations/0001_init.sql`.

use domains::*;
use sqlx::postgres::PgRow;
use sqlx::Row;

pub(crate) const PLAYER_COLUMNS: &str =
    "id, telegram_id, username, full_name, role, current_level, current_rating, created_at";

pub(crate) const CYCLE_COLUMNS: &str = "id, cycle_number, start_time, end_time, duration_minutes, \
     rating_timeout_minutes, is_active, level_recalculation_done";

pub(crate) fn db_err(err: sqlx::Error) -> DomainError {
    DomainError::Persistence(err.to_string())
}

pub(crate) fn player(row: &PgRow) -> Result<Player> {
    Ok(Player {
        id: row.try_get("id").map_err(db_err)?,
        external_id: row.try_get("telegram_id").map_err(db_err)?,
        username: row.try_get("username").map_err(db_err)?,
        full_name: row.try_get("full_name").map_err(db_err)?,
        role: row.try_get::<String, _>("role").map_err(db_err)?.parse()?,
        level: Level::new(row.try_get("current_level").map_err(db_err)?)?,
        balance: row.try_get("current_rating").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

pub(crate) fn cycle(row: &PgRow) -> Result<GameCycle> {
    Ok(GameCycle {
        id: row.try_get("id").map_err(db_err)?,
        cycle_number: row.try_get("cycle_number").map_err(db_err)?,
        start_time: row.try_get("start_time").map_err(db_err)?,
        end_time: row.try_get("end_time").map_err(db_err)?,
        duration_minutes: row.try_get("duration_minutes").map_err(db_err)?,
        cooldown_minutes: row.try_get("rating_timeout_minutes").map_err(db_err)?,
        active: row.try_get("is_active").map_err(db_err)?,
        level_recalculation_done: row.try_get("level_recalculation_done").map_err(db_err)?,
    })
}

pub(crate) fn system_config(row: &PgRow) -> Result<SystemConfig> {
    Ok(SystemConfig {
        formula_a: row.try_get("rating_formula_a").map_err(db_err)?,
        formula_b: row.try_get("rating_formula_b").map_err(db_err)?,
        default_cycle_duration_minutes: row.try_get("default_cycle_duration_minutes").map_err(db_err)?,
        default_rating_timeout_minutes: row.try_get("default_rating_timeout_minutes").map_err(db_err)?,
    })
}

pub(crate) fn rating_limit(row: &PgRow) -> Result<RatingLimit> {
    Ok(RatingLimit {
        level: Level::new(row.try_get("player_level").map_err(db_err)?)?,
        limit: row.try_get("ratings_per_cycle").map_err(db_err)?,
    })
}

pub(crate) fn level_boundary(row: &PgRow) -> Result<LevelBoundary> {
    Ok(LevelBoundary {
        cycle_id: row.try_get("game_cycle_id").map_err(db_err)?,
        level: Level::new(row.try_get("level_number").map_err(db_err)?)?,
        min_rating: row.try_get("min_rating").map_err(db_err)?,
        max_rating: row.try_get("max_rating").map_err(db_err)?,
    })
}

pub(crate) fn rating(row: &PgRow) -> Result<RatingLedgerEntry> {
    Ok(RatingLedgerEntry {
        id: row.try_get("id").map_err(db_err)?,
        rater_id: row.try_get("rater_id").map_err(db_err)?,
        rated_id: row.try_get("rated_id").map_err(db_err)?,
        kind: row.try_get::<String, _>("rating_type").map_err(db_err)?.parse()?,
        delta: row.try_get("rating_value").map_err(db_err)?,
        cycle_id: row.try_get("game_cycle_id").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

pub(crate) fn transfer(row: &PgRow) -> Result<TransferLedgerEntry> {
    Ok(TransferLedgerEntry {
        id: row.try_get("id").map_err(db_err)?,
        sender_id: row.try_get("sender_id").map_err(db_err)?,
        receiver_id: row.try_get("receiver_id").map_err(db_err)?,
        amount: row.try_get("amount").map_err(db_err)?,
        cycle_id: row.try_get("game_cycle_id").map_err(db_err)?,
        description: row.try_get("description").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

pub(crate) fn level_history(row: &PgRow) -> Result<LevelHistoryEntry> {
    Ok(LevelHistoryEntry {
        id: row.try_get("id").map_err(db_err)?,
        player_id: row.try_get("player_id").map_err(db_err)?,
        old_level: Level::new(row.try_get("old_level").map_err(db_err)?)?,
        new_level: Level::new(row.try_get("new_level").map_err(db_err)?)?,
        old_rating: row.try_get("old_rating").map_err(db_err)?,
        new_rating: row.try_get("new_rating").map_err(db_err)?,
        cycle_id: row.try_get("game_cycle_id").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

pub(crate) fn operation(row: &PgRow) -> Result<OperationLogEntry> {
    Ok(OperationLogEntry {
        id: row.try_get("id").map_err(db_err)?,
        operation_type: row.try_get::<String, _>("operation_type").map_err(db_err)?.parse()?,
        initiator_id: row.try_get("initiator_id").map_err(db_err)?,
        target_id: row.try_get("target_id").map_err(db_err)?,
        details: row.try_get("details").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}
