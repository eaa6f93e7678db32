//! Administrative actions: tunables, quotas, boundaries, roles and player onboarding.
//!
//! Inputs are re-validated here even though collaborators validate first.

use std::sync::Arc;

use domains::{
    Clock, DomainError, LedgerStore, Level, LevelBoundary, NewPlayer, OperationType, Player, PlayerId, PlayerRepo,
    RatingLimit, Result, Role, SettingsRepo, SystemConfig,
};
use serde_json::json;
use tracing::info;

use crate::audit::Auditor;
use crate::cycle;
use crate::players::new_link_hash;
use crate::Ports;

#[derive(Clone)]
pub struct AdminService {
    settings: Arc<dyn SettingsRepo>,
    players: Arc<dyn PlayerRepo>,
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    auditor: Auditor,
}

impl AdminService {
    pub fn new(ports: &Ports, auditor: Auditor) -> Self {
        Self {
            settings: ports.settings.clone(),
            players: ports.players.clone(),
            store: ports.store.clone(),
            clock: ports.clock.clone(),
            auditor,
        }
    }

    /// Applies to cycles created after this call.
    pub async fn update_cycle_duration(&self, actor: Option<PlayerId>, minutes: i32) -> Result<()> {
        if minutes < SystemConfig::MIN_CYCLE_DURATION_MINUTES {
            return Err(DomainError::Validation(format!(
                "cycle duration must be at least {} minutes",
                SystemConfig::MIN_CYCLE_DURATION_MINUTES
            )));
        }
        self.settings.update_cycle_duration(minutes).await?;
        info!(minutes, "cycle duration updated");
        self.auditor
            .record(OperationType::ConfigUpdate, actor, None, json!({ "cycle_duration_minutes": minutes }))
            .await;
        Ok(())
    }

    /// Applies to cycles created after this call.
    pub async fn update_rating_timeout(&self, actor: Option<PlayerId>, minutes: i32) -> Result<()> {
        if minutes <= 0 {
            return Err(DomainError::Validation("rating timeout must be positive".into()));
        }
        self.settings.update_rating_timeout(minutes).await?;
        info!(minutes, "rating timeout updated");
        self.auditor
            .record(OperationType::ConfigUpdate, actor, None, json!({ "rating_timeout_minutes": minutes }))
            .await;
        Ok(())
    }

    pub async fn update_formula(&self, actor: Option<PlayerId>, formula_a: f64, formula_b: f64) -> Result<()> {
        for (name, value) in [("A", formula_a), ("B", formula_b)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DomainError::Validation(format!("formula {name} must be positive")));
            }
        }
        self.settings.update_formula(formula_a, formula_b).await?;
        info!(formula_a, formula_b, "rating formula updated");
        self.auditor
            .record(OperationType::ConfigUpdate, actor, None, json!({ "formula_a": formula_a, "formula_b": formula_b }))
            .await;
        Ok(())
    }

    pub async fn set_rating_limit(&self, actor: Option<PlayerId>, level: i32, limit: i32) -> Result<RatingLimit> {
        let level = Level::new(level)?;
        if limit <= 0 {
            return Err(DomainError::Validation("rating limit must be positive".into()));
        }
        let limit = RatingLimit { level, limit };
        self.settings.upsert_rating_limit(limit).await?;
        info!(level = %level, limit = limit.limit, "rating limit updated");
        self.auditor
            .record(OperationType::RatingLimitUpdate, actor, None, json!({ "level": level, "limit": limit.limit }))
            .await;
        Ok(limit)
    }

    pub async fn rating_limit(&self, level: i32) -> Result<Option<RatingLimit>> {
        self.settings.rating_limit(Level::new(level)?).await
    }

    /// Boundaries always belong to the currently active cycle.
    pub async fn set_level_boundary(
        &self,
        actor: Option<PlayerId>,
        level: i32,
        min_rating: i64,
        max_rating: i64,
        config: &SystemConfig,
    ) -> Result<LevelBoundary> {
        let level = Level::new(level)?;
        if max_rating < min_rating {
            return Err(DomainError::Validation("max rating must not be below min rating".into()));
        }
        let mut tx = self.store.begin().await?;
        let cycle = cycle::cycle_for_write(tx.as_mut(), config, self.clock.now()).await?;
        let boundary = LevelBoundary { cycle_id: cycle.id, level, min_rating, max_rating };
        tx.upsert_level_boundary(boundary).await?;
        tx.commit().await?;
        info!(cycle_id = cycle.id, level = %level, min_rating, max_rating, "level boundary updated");
        self.auditor
            .record(
                OperationType::LevelBoundaryUpdate,
                actor,
                None,
                json!({ "cycle_id": cycle.id, "level": level, "min_rating": min_rating, "max_rating": max_rating }),
            )
            .await;
        Ok(boundary)
    }

    pub async fn level_boundaries(&self, cycle_id: domains::CycleId) -> Result<Vec<LevelBoundary>> {
        self.settings.level_boundaries(cycle_id).await
    }

    /// Creates a player on behalf of an administrator and issues a profile link.
    pub async fn add_player(&self, actor: Option<PlayerId>, external_id: i64, full_name: &str) -> Result<(Player, String)> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(DomainError::Validation("full name must not be empty".into()));
        }
        let player = self
            .players
            .create_player(NewPlayer { external_id, username: String::new(), full_name: full_name.to_owned() })
            .await?;
        let link = new_link_hash();
        self.players.upsert_player_link(player.id, &link).await?;
        info!(player_id = player.id, external_id, "player added");
        self.auditor
            .record(OperationType::PlayerCreated, actor, Some(player.id), json!({ "external_id": external_id }))
            .await;
        Ok((player, link))
    }

    pub async fn set_role(&self, actor: Option<PlayerId>, external_id: i64, role: Role) -> Result<()> {
        self.players.set_role(external_id, role).await?;
        info!(external_id, role = %role, "player role updated");
        self.auditor
            .record(OperationType::RoleUpdate, actor, None, json!({ "external_id": external_id, "role": role }))
            .await;
        Ok(())
    }

    pub async fn create_admin(&self, actor: Option<PlayerId>, external_id: i64) -> Result<()> {
        self.set_role(actor, external_id, Role::Admin).await
    }
}
