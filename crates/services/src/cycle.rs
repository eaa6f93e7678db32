//! # Cycle Lifecycle
//!
//! Owns the "at most one active cycle" invariant. Rollover runs inside a
//! transaction holding the rollover lock, so two callers racing on the same
//! expiry see exactly one new cycle between them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domains::{Clock, GameCycle, LedgerStore, LedgerTx, NewCycle, Result, SystemConfig};
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct CycleService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl CycleService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns the running cycle, rolling over to a fresh one if it has expired
    /// (or if none exists yet).
    #[instrument(skip_all)]
    pub async fn ensure_active_cycle(&self, config: &SystemConfig) -> Result<GameCycle> {
        if let Some(cycle) = self.store.active_cycle().await? {
            if !cycle.is_expired_at(self.clock.now()) {
                return Ok(cycle);
            }
        }

        let mut tx = self.store.begin().await?;
        let (cycle, created) = roll_over(tx.as_mut(), config, self.clock.now()).await?;
        tx.commit().await?;

        if created {
            info!(
                cycle_id = cycle.id,
                cycle_number = cycle.cycle_number,
                end_time = %cycle.end_time,
                "started new game cycle"
            );
        } else {
            debug!(cycle_id = cycle.id, "rollover already performed by a concurrent caller");
        }
        Ok(cycle)
    }

    pub async fn active_cycle(&self) -> Result<Option<GameCycle>> {
        self.store.active_cycle().await
    }
}

/// The cycle a write inside `tx` belongs to, rolling over first when the
/// running one has expired at `now`. A rollover done here commits or rolls
/// back together with the caller's write.
pub async fn cycle_for_write(tx: &mut dyn LedgerTx, config: &SystemConfig, now: DateTime<Utc>) -> Result<GameCycle> {
    if let Some(cycle) = tx.active_cycle().await? {
        if !cycle.is_expired_at(now) {
            return Ok(cycle);
        }
    }
    let (cycle, created) = roll_over(tx, config, now).await?;
    if created {
        debug!(cycle_id = cycle.id, cycle_number = cycle.cycle_number, "rolled over inside ledger transaction");
    }
    Ok(cycle)
}

/// Lock, re-check and (if still needed) replace the active cycle.
///
/// The returned flag is `true` when this call created the cycle.
pub async fn roll_over(tx: &mut dyn LedgerTx, config: &SystemConfig, now: DateTime<Utc>) -> Result<(GameCycle, bool)> {
    tx.lock_cycle_rollover().await?;

    if let Some(current) = tx.active_cycle().await? {
        if !current.is_expired_at(now) {
            return Ok((current, false));
        }
        tx.deactivate_cycle(current.id).await?;
    }

    let number = tx.next_cycle_number().await?;
    let cycle = tx.insert_cycle(NewCycle::starting_at(number, now, config)).await?;
    Ok((cycle, true))
}
