//! # DomainError
//!
//! Centralized error handling for the ledger.
//! Every failure carries a stable [`ErrorKind`] so callers can branch on it.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::models::CycleId;

/// Why a policy check refused an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Same rater rated the same target within the cycle cooldown
    TooFrequent,
    /// Rater used up their per-cycle quota
    QuotaExhausted,
    /// Actor and target are the same player
    SelfAction,
    /// Sender cannot cover the transfer amount
    InsufficientBalance,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialReason::TooFrequent => "too_frequent",
            DenialReason::QuotaExhausted => "quota_exhausted",
            DenialReason::SelfAction => "self_action",
            DenialReason::InsufficientBalance => "insufficient_balance",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary error type for all ledger operations.
#[derive(Error, Debug)]
pub enum DomainError {
    /// Malformed or out-of-range input
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown player, cycle, link or configuration row
    #[error("{entity} not found with ID {id}")]
    NotFound { entity: &'static str, id: String },

    /// A rate, cooldown, identity or balance rule refused the action
    #[error("denied by policy: {0}")]
    Denied(DenialReason),

    /// Recalculation requested for a cycle without boundaries
    #[error("no level boundaries configured for cycle {0}")]
    NoBoundariesConfigured(CycleId),

    /// Transaction or storage failure
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        DomainError::NotFound { entity, id: id.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::Denied(_) => ErrorKind::DeniedByPolicy,
            DomainError::NoBoundariesConfigured(_) => ErrorKind::NoBoundariesConfigured,
            DomainError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// The denial reason, if this error is a policy denial.
    pub fn denial(&self) -> Option<DenialReason> {
        match self {
            DomainError::Denied(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Stable classification of [`DomainError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    DeniedByPolicy,
    NoBoundariesConfigured,
    Persistence,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DeniedByPolicy => "denied_by_policy",
            ErrorKind::NoBoundariesConfigured => "no_boundaries_configured",
            ErrorKind::Persistence => "persistence_error",
        }
    }
}

/// A specialized Result type for ledger logic.
pub type Result<T> = std::result::Result<T, DomainError>;
