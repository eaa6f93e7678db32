//! # Domain Models
//!
//! These structs represent the core entities of the rating ledger.
//! Identifiers are database-assigned sequential integers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

pub type PlayerId = i64;
pub type CycleId = i64;

/// Participant role. Anything above `Player` may perform administrative actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Player,
    Moderator,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_privileged(self) -> bool {
        !matches!(self, Role::Player)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Player => "player",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "player" => Ok(Role::Player),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(DomainError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

/// A player level, always within `Level::MIN..=Level::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Level(i32);

impl Level {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 5;
    pub const FIRST: Level = Level(Self::MIN);

    pub fn new(value: i32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Level(value))
        } else {
            Err(DomainError::Validation(format!(
                "level must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl Default for Level {
    fn default() -> Self {
        Level::FIRST
    }
}

impl TryFrom<i32> for Level {
    type Error = DomainError;

    fn try_from(value: i32) -> Result<Self> {
        Level::new(value)
    }
}

impl From<Level> for i32 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant. `balance` is the running total of every ledger delta applied to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    /// Identity in the messaging transport (e.g. a chat user id)
    pub external_id: i64,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub level: Level,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlayer {
    pub external_id: i64,
    pub username: String,
    pub full_name: String,
}

/// System-wide tunables. Read once per request and passed down explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub formula_a: f64,
    pub formula_b: f64,
    pub default_cycle_duration_minutes: i32,
    pub default_rating_timeout_minutes: i32,
}

impl SystemConfig {
    /// Shortest cycle an administrator may configure.
    pub const MIN_CYCLE_DURATION_MINUTES: i32 = 15;

    pub fn validate(&self) -> Result<()> {
        if !(self.formula_a.is_finite() && self.formula_a > 0.0) {
            return Err(DomainError::Validation("formula A must be positive".into()));
        }
        if !(self.formula_b.is_finite() && self.formula_b > 0.0) {
            return Err(DomainError::Validation("formula B must be positive".into()));
        }
        if self.default_cycle_duration_minutes < Self::MIN_CYCLE_DURATION_MINUTES {
            return Err(DomainError::Validation(format!(
                "cycle duration must be at least {} minutes",
                Self::MIN_CYCLE_DURATION_MINUTES
            )));
        }
        if self.default_rating_timeout_minutes <= 0 {
            return Err(DomainError::Validation("rating timeout must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            formula_a: 1.0,
            formula_b: 1.0,
            default_cycle_duration_minutes: 60,
            default_rating_timeout_minutes: 10,
        }
    }
}

/// A time-boxed scoring epoch. Duration and cooldown are frozen at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameCycle {
    pub id: CycleId,
    pub cycle_number: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub cooldown_minutes: i32,
    pub active: bool,
    pub level_recalculation_done: bool,
}

impl GameCycle {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    pub fn cooldown(&self) -> Duration {
        Duration::minutes(i64::from(self.cooldown_minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCycle {
    pub cycle_number: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub cooldown_minutes: i32,
}

impl NewCycle {
    /// Captures the configured duration and cooldown for a cycle beginning at `start`.
    pub fn starting_at(cycle_number: i32, start: DateTime<Utc>, config: &SystemConfig) -> Self {
        let duration = config.default_cycle_duration_minutes;
        Self {
            cycle_number,
            start_time: start,
            end_time: start + Duration::minutes(i64::from(duration)),
            duration_minutes: duration,
            cooldown_minutes: config.default_rating_timeout_minutes,
        }
    }
}

/// Per-level quota of rating actions within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingLimit {
    pub level: Level,
    pub limit: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingType {
    Like,
    Dislike,
}

impl RatingType {
    pub fn sign(self) -> i64 {
        match self {
            RatingType::Like => 1,
            RatingType::Dislike => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RatingType::Like => "like",
            RatingType::Dislike => "dislike",
        }
    }
}

impl fmt::Display for RatingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RatingType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "like" => Ok(RatingType::Like),
            "dislike" => Ok(RatingType::Dislike),
            other => Err(DomainError::Validation(format!("unknown rating type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingLedgerEntry {
    pub id: i64,
    pub rater_id: PlayerId,
    pub rated_id: PlayerId,
    pub kind: RatingType,
    pub delta: i64,
    pub cycle_id: CycleId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRatingEntry {
    pub rater_id: PlayerId,
    pub rated_id: PlayerId,
    pub kind: RatingType,
    pub delta: i64,
    pub cycle_id: CycleId,
    pub created_at: DateTime<Utc>,
}

/// What an accepted rating produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingOutcome {
    pub ledger_id: i64,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLedgerEntry {
    pub id: i64,
    pub sender_id: PlayerId,
    pub receiver_id: PlayerId,
    pub amount: i64,
    pub cycle_id: CycleId,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransferEntry {
    pub sender_id: PlayerId,
    pub receiver_id: PlayerId,
    pub amount: i64,
    pub cycle_id: CycleId,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Inclusive balance range mapped to a level, scoped to one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelBoundary {
    pub cycle_id: CycleId,
    pub level: Level,
    pub min_rating: i64,
    pub max_rating: i64,
}

impl LevelBoundary {
    pub fn contains(&self, balance: i64) -> bool {
        self.min_rating <= balance && balance <= self.max_rating
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelHistoryEntry {
    pub id: i64,
    pub player_id: PlayerId,
    pub old_level: Level,
    pub new_level: Level,
    pub old_rating: i64,
    pub new_rating: i64,
    pub cycle_id: CycleId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLevelHistory {
    pub player_id: PlayerId,
    pub old_level: Level,
    pub new_level: Level,
    pub old_rating: i64,
    pub new_rating: i64,
    pub cycle_id: CycleId,
    pub created_at: DateTime<Utc>,
}

/// Kinds of audited operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    RatingLike,
    RatingDislike,
    RatingTransfer,
    LevelRecalculation,
    ConfigUpdate,
    RatingLimitUpdate,
    LevelBoundaryUpdate,
    RoleUpdate,
    PlayerCreated,
}

impl OperationType {
    pub fn for_rating(kind: RatingType) -> Self {
        match kind {
            RatingType::Like => OperationType::RatingLike,
            RatingType::Dislike => OperationType::RatingDislike,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::RatingLike => "rating_like",
            OperationType::RatingDislike => "rating_dislike",
            OperationType::RatingTransfer => "rating_transfer",
            OperationType::LevelRecalculation => "level_recalculation",
            OperationType::ConfigUpdate => "config_update",
            OperationType::RatingLimitUpdate => "rating_limit_update",
            OperationType::LevelBoundaryUpdate => "level_boundary_update",
            OperationType::RoleUpdate => "role_update",
            OperationType::PlayerCreated => "player_created",
        }
    }
}

impl FromStr for OperationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_owned()))
            .map_err(|_| DomainError::Validation(format!("unknown operation type '{s}'")))
    }
}

/// Audit trail row. Used for traceability only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: i64,
    pub operation_type: OperationType,
    pub initiator_id: Option<PlayerId>,
    pub target_id: Option<PlayerId>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOperationLog {
    pub operation_type: OperationType,
    pub initiator_id: Option<PlayerId>,
    pub target_id: Option<PlayerId>,
    pub details: serde_json::Value,
}

/// What an accepted transfer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub ledger_id: i64,
    pub sender_balance: i64,
    pub receiver_balance: i64,
}
