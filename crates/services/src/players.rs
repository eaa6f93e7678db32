//! Identity resolution and profile links.

use std::sync::Arc;

use domains::{DomainError, NewPlayer, Player, PlayerId, PlayerRepo, Result, Role};
use tracing::{debug, info};
use uuid::Uuid;

/// A fresh, unguessable profile-link token.
pub fn new_link_hash() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Clone)]
pub struct PlayerService {
    players: Arc<dyn PlayerRepo>,
}

impl PlayerService {
    pub fn new(players: Arc<dyn PlayerRepo>) -> Self {
        Self { players }
    }

    /// Lookup-or-create by transport identity. An empty full name falls back to the username.
    pub async fn ensure_player(&self, external_id: i64, username: &str, full_name: &str) -> Result<Player> {
        if let Some(player) = self.players.player_by_external_id(external_id).await? {
            return Ok(player);
        }

        let full_name = match full_name.trim() {
            "" => username.trim(),
            name => name,
        };
        let created = self
            .players
            .create_player(NewPlayer { external_id, username: username.to_owned(), full_name: full_name.to_owned() })
            .await;
        match created {
            Ok(player) => {
                info!(player_id = player.id, external_id, "player registered");
                Ok(player)
            }
            // Lost a creation race with a concurrent request for the same identity.
            Err(err) => match self.players.player_by_external_id(external_id).await? {
                Some(player) => Ok(player),
                None => Err(err),
            },
        }
    }

    /// Updates the profile of a (possibly new) player.
    pub async fn register(&self, external_id: i64, username: &str, full_name: &str, role: Role) -> Result<Player> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(DomainError::Validation("full name must not be empty".into()));
        }
        let player = self.ensure_player(external_id, username, full_name).await?;
        self.players.update_profile(external_id, full_name, role).await?;
        Ok(Player { full_name: full_name.to_owned(), role, ..player })
    }

    pub async fn player(&self, id: PlayerId) -> Result<Player> {
        self.players.player_by_id(id).await?.ok_or_else(|| DomainError::not_found("player", id))
    }

    pub async fn player_by_external_id(&self, external_id: i64) -> Result<Player> {
        self.players
            .player_by_external_id(external_id)
            .await?
            .ok_or_else(|| DomainError::not_found("player", external_id))
    }

    /// Existing profile link, or a newly issued one.
    pub async fn player_link(&self, player_id: PlayerId) -> Result<String> {
        if let Some(link) = self.players.player_link(player_id).await? {
            return Ok(link);
        }
        let link = new_link_hash();
        self.players.upsert_player_link(player_id, &link).await?;
        debug!(player_id, "issued profile link");
        Ok(link)
    }

    pub async fn player_by_link(&self, link_hash: &str) -> Result<Player> {
        self.players
            .player_by_link(link_hash)
            .await?
            .ok_or_else(|| DomainError::not_found("player link", link_hash))
    }

    /// Unknown players are not privileged.
    pub async fn is_privileged(&self, player_id: PlayerId) -> Result<bool> {
        Ok(self.players.player_by_id(player_id).await?.is_some_and(|p| p.role.is_privileged()))
    }
}
