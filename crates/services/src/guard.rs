//! # Rate/Cooldown Guard
//!
//! Decides whether a rating action may proceed. The guard reads through the
//! caller's transaction: with the rater's row locked, the quota count it sees
//! cannot change before the caller inserts the new entry.

use chrono::{DateTime, Duration, Utc};
use domains::{DenialReason, DomainError, GameCycle, LedgerTx, Level, PlayerId, RatingLimit, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    Denied(DenialReason),
}

impl GuardDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, GuardDecision::Allowed)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            GuardDecision::Allowed => Ok(()),
            GuardDecision::Denied(reason) => Err(DomainError::Denied(reason)),
        }
    }
}

/// Actor and target must be different players.
pub fn ensure_distinct(actor: PlayerId, target: PlayerId) -> Result<()> {
    if actor == target {
        return Err(DomainError::Denied(DenialReason::SelfAction));
    }
    Ok(())
}

pub fn cooldown_decision(last: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown: Duration) -> GuardDecision {
    match last {
        Some(last) if now - last < cooldown => GuardDecision::Denied(DenialReason::TooFrequent),
        _ => GuardDecision::Allowed,
    }
}

/// A missing limit means unlimited.
pub fn quota_decision(count: i64, limit: Option<RatingLimit>) -> GuardDecision {
    match limit {
        Some(limit) if count >= i64::from(limit.limit) => GuardDecision::Denied(DenialReason::QuotaExhausted),
        _ => GuardDecision::Allowed,
    }
}

/// Cooldown first (direction matters: only this rater against this target),
/// then the per-cycle quota for the rater's level.
pub async fn check_rating_allowed(
    tx: &mut dyn LedgerTx,
    rater_id: PlayerId,
    rated_id: PlayerId,
    rater_level: Level,
    cycle: &GameCycle,
    now: DateTime<Utc>,
) -> Result<GuardDecision> {
    if rater_id == rated_id {
        return Ok(GuardDecision::Denied(DenialReason::SelfAction));
    }

    let last = tx.last_rating_between(rater_id, rated_id).await?;
    let decision = cooldown_decision(last, now, cycle.cooldown());
    if !decision.is_allowed() {
        return Ok(decision);
    }

    let Some(limit) = tx.rating_limit(rater_level).await? else {
        return Ok(GuardDecision::Allowed);
    };
    let count = tx.count_ratings_in_cycle(rater_id, cycle.id).await?;
    Ok(quota_decision(count, Some(limit)))
}
