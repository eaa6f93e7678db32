//! # Rating Ledger
//!
//! Computes rating deltas and records them. The ledger row and the target's
//! balance change are written in the same transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domains::{
    Clock, DomainError, GameCycle, LedgerStore, LedgerTx, Level, NewRatingEntry, OperationType, Player, PlayerId,
    RatingOutcome, RatingType, Result, SystemConfig,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::audit::Auditor;
use crate::cycle;
use crate::guard::{self, GuardDecision};
use crate::lock_pair;

/// `round(sign * A * rater_level / (rated_level * B))`, never zero.
pub fn compute_delta(config: &SystemConfig, rater_level: Level, rated_level: Level, kind: RatingType) -> i64 {
    let sign = kind.sign() as f64;
    let raw = sign * (config.formula_a * f64::from(rater_level.get()))
        / (f64::from(rated_level.get()) * config.formula_b);
    let rounded = raw.round() as i64;
    if rounded == 0 {
        kind.sign()
    } else {
        rounded
    }
}

/// Appends the rating entry and moves the target's balance by the computed delta.
pub async fn apply_rating(
    tx: &mut dyn LedgerTx,
    rater: &Player,
    rated: &Player,
    cycle: &GameCycle,
    kind: RatingType,
    config: &SystemConfig,
    now: DateTime<Utc>,
) -> Result<RatingOutcome> {
    let delta = compute_delta(config, rater.level, rated.level, kind);
    let ledger_id = tx
        .insert_rating(NewRatingEntry {
            rater_id: rater.id,
            rated_id: rated.id,
            kind,
            delta,
            cycle_id: cycle.id,
            created_at: now,
        })
        .await?;
    tx.adjust_balance(rated.id, delta).await?;
    Ok(RatingOutcome { ledger_id, delta })
}

#[derive(Clone)]
pub struct RatingService {
    store: Arc<dyn LedgerStore>,
    auditor: Auditor,
    clock: Arc<dyn Clock>,
}

impl RatingService {
    pub fn new(store: Arc<dyn LedgerStore>, auditor: Auditor, clock: Arc<dyn Clock>) -> Self {
        Self { store, auditor, clock }
    }

    /// Full rating flow: identity check, cycle rollover, guard, apply.
    ///
    /// Rollover, guard and apply share one transaction that holds both
    /// players' row locks, so a rater's concurrent submissions are checked one
    /// at a time and always against the cycle the entry is recorded in.
    #[instrument(skip(self, config))]
    pub async fn submit_rating(
        &self,
        rater_id: PlayerId,
        rated_id: PlayerId,
        kind: RatingType,
        config: &SystemConfig,
    ) -> Result<RatingOutcome> {
        guard::ensure_distinct(rater_id, rated_id)?;

        let mut tx = self.store.begin().await?;
        let now = self.clock.now();
        let cycle = cycle::cycle_for_write(tx.as_mut(), config, now).await?;
        let (rater, rated) = lock_pair(tx.as_mut(), rater_id, rated_id).await?;

        let decision = guard::check_rating_allowed(tx.as_mut(), rater.id, rated.id, rater.level, &cycle, now).await?;
        if let GuardDecision::Denied(reason) = decision {
            warn!(rater_id, rated_id, reason = %reason, "rating denied");
            return Err(DomainError::Denied(reason));
        }

        let outcome = apply_rating(tx.as_mut(), &rater, &rated, &cycle, kind, config, now).await?;
        tx.commit().await?;

        info!(
            rater_id,
            rated_id,
            cycle_id = cycle.id,
            ledger_id = outcome.ledger_id,
            delta = outcome.delta,
            "rating applied"
        );
        self.auditor
            .record(
                OperationType::for_rating(kind),
                Some(rater.id),
                Some(rated.id),
                json!({
                    "rating_change": outcome.delta,
                    "rater_level": rater.level,
                    "rated_level": rated.level,
                }),
            )
            .await;
        Ok(outcome)
    }

    /// Most recent rating from `rater_id` about `rated_id`, if any.
    pub async fn last_rating_between(&self, rater_id: PlayerId, rated_id: PlayerId) -> Result<Option<DateTime<Utc>>> {
        self.store.last_rating_between(rater_id, rated_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(n: i32) -> Level {
        Level::new(n).unwrap()
    }

    #[test]
    fn higher_rater_level_weighs_more() {
        let delta = compute_delta(&SystemConfig::default(), level(3), level(1), RatingType::Like);
        assert_eq!(delta, 3);
    }

    #[test]
    fn small_dislike_is_clamped_to_minus_one() {
        let delta = compute_delta(&SystemConfig::default(), level(1), level(5), RatingType::Dislike);
        assert_eq!(delta, -1);
    }

    #[test]
    fn small_like_is_clamped_to_plus_one() {
        let delta = compute_delta(&SystemConfig::default(), level(1), level(4), RatingType::Like);
        assert_eq!(delta, 1);
    }

    #[test]
    fn coefficients_scale_the_delta() {
        let config = SystemConfig { formula_a: 2.0, formula_b: 0.5, ..Default::default() };
        // 2 * 2 / (1 * 0.5) = 8
        assert_eq!(compute_delta(&config, level(2), level(1), RatingType::Like), 8);
        assert_eq!(compute_delta(&config, level(2), level(1), RatingType::Dislike), -8);
    }

    #[test]
    fn halves_round_away_from_zero() {
        // 1 * 5 / (2 * 1) = 2.5
        assert_eq!(compute_delta(&SystemConfig::default(), level(5), level(2), RatingType::Like), 3);
        assert_eq!(compute_delta(&SystemConfig::default(), level(5), level(2), RatingType::Dislike), -3);
    }
}
