//! # Level Recalculation
//!
//! Remaps every player's balance to a level using the boundaries of a cycle.
//! Each player is handled in its own transaction: the level update and its
//! history row commit together, but progress across players is independent.
//!
//! Overlapping boundaries resolve to the lowest matching level.

use std::sync::Arc;

use domains::{
    Clock, CycleId, DomainError, LedgerStore, Level, LevelBoundary, LevelHistoryEntry, NewLevelHistory,
    OperationType, PlayerId, PlayerRepo, Result, SettingsRepo, SystemConfig,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::audit::Auditor;
use crate::cycle::CycleService;
use crate::Ports;

/// The level whose range contains `balance`; lowest level wins on overlap.
pub fn match_level(boundaries: &[LevelBoundary], balance: i64) -> Option<Level> {
    boundaries.iter().filter(|b| b.contains(balance)).map(|b| b.level).min()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecalculationReport {
    pub cycle_id: CycleId,
    pub changed: usize,
}

#[derive(Clone)]
pub struct LevelService {
    store: Arc<dyn LedgerStore>,
    settings: Arc<dyn SettingsRepo>,
    players: Arc<dyn PlayerRepo>,
    cycles: CycleService,
    auditor: Auditor,
    clock: Arc<dyn Clock>,
}

impl LevelService {
    pub fn new(ports: &Ports, cycles: CycleService, auditor: Auditor) -> Self {
        Self {
            store: ports.store.clone(),
            settings: ports.settings.clone(),
            players: ports.players.clone(),
            cycles,
            auditor,
            clock: ports.clock.clone(),
        }
    }

    /// Returns how many players changed level.
    #[instrument(skip(self, boundaries), fields(boundaries = boundaries.len()))]
    pub async fn recalculate_levels(&self, cycle_id: CycleId, boundaries: &[LevelBoundary]) -> Result<usize> {
        if boundaries.is_empty() {
            return Err(DomainError::NoBoundariesConfigured(cycle_id));
        }
        if self.store.cycle_by_id(cycle_id).await?.is_none() {
            return Err(DomainError::not_found("game cycle", cycle_id));
        }

        let mut changed = 0;
        for player_id in self.players.list_player_ids().await? {
            if self.recalculate_player(player_id, cycle_id, boundaries).await? {
                changed += 1;
            }
        }

        let mut tx = self.store.begin().await?;
        tx.mark_levels_recalculated(cycle_id).await?;
        tx.commit().await?;

        info!(cycle_id, changed, "level recalculation finished");
        self.auditor
            .record(OperationType::LevelRecalculation, None, None, json!({ "cycle_id": cycle_id, "changed": changed }))
            .await;
        Ok(changed)
    }

    /// Recalculates against the active cycle's own boundaries.
    pub async fn apply_level_recalculation(&self, config: &SystemConfig) -> Result<RecalculationReport> {
        let cycle = self.cycles.ensure_active_cycle(config).await?;
        let boundaries = self.settings.level_boundaries(cycle.id).await?;
        let changed = self.recalculate_levels(cycle.id, &boundaries).await?;
        Ok(RecalculationReport { cycle_id: cycle.id, changed })
    }

    pub async fn level_history(&self, player_id: PlayerId) -> Result<Vec<LevelHistoryEntry>> {
        self.store.level_history(player_id).await
    }

    async fn recalculate_player(&self, player_id: PlayerId, cycle_id: CycleId, boundaries: &[LevelBoundary]) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        // Player removed since the id list was read.
        let Some(player) = tx.lock_player(player_id).await? else {
            return Ok(false);
        };
        let Some(new_level) = match_level(boundaries, player.balance) else {
            return Ok(false);
        };
        if new_level == player.level {
            return Ok(false);
        }

        tx.set_level(player.id, new_level).await?;
        tx.insert_level_history(NewLevelHistory {
            player_id: player.id,
            old_level: player.level,
            new_level,
            old_rating: player.balance,
            new_rating: player.balance,
            cycle_id,
            created_at: self.clock.now(),
        })
        .await?;
        tx.commit().await?;

        debug!(player_id, old_level = %player.level, new_level = %new_level, "player level changed");
        Ok(true)
    }
}
