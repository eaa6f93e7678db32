//! # services
//!
//! Business rules of the cycle-scoped rating ledger. Every service talks to
//! storage exclusively through the ports defined in `domains`.

use std::sync::Arc;

use domains::{
    AuditLog, Clock, DomainError, LedgerStore, LedgerTx, Player, PlayerId, PlayerRepo, Result, SettingsRepo,
    SystemConfig,
};

pub mod admin;
pub mod audit;
pub mod cycle;
pub mod guard;
pub mod levels;
pub mod players;
pub mod rating;
pub mod transfer;

pub use admin::AdminService;
pub use audit::Auditor;
pub use cycle::CycleService;
pub use guard::GuardDecision;
pub use levels::{LevelService, RecalculationReport};
pub use players::PlayerService;
pub use rating::RatingService;
pub use transfer::TransferService;

/// The storage and time dependencies every service is built from.
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn LedgerStore>,
    pub settings: Arc<dyn SettingsRepo>,
    pub players: Arc<dyn PlayerRepo>,
    pub audit: Arc<dyn AuditLog>,
    pub clock: Arc<dyn Clock>,
}

impl Ports {
    /// Wires all ports to a single adapter that implements every one of them.
    pub fn from_store<S>(store: Arc<S>, clock: Arc<dyn Clock>) -> Self
    where
        S: LedgerStore + SettingsRepo + PlayerRepo + AuditLog + 'static,
    {
        Self {
            store: store.clone(),
            settings: store.clone(),
            players: store.clone(),
            audit: store,
            clock,
        }
    }
}

/// All ledger services, ready to be shared across request handlers.
#[derive(Clone)]
pub struct Ledger {
    pub cycles: CycleService,
    pub ratings: RatingService,
    pub transfers: TransferService,
    pub levels: LevelService,
    pub admin: AdminService,
    pub players: PlayerService,
    pub auditor: Auditor,
    settings: Arc<dyn SettingsRepo>,
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(ports: Ports) -> Self {
        let auditor = Auditor::new(ports.audit.clone());
        let cycles = CycleService::new(ports.store.clone(), ports.clock.clone());
        Self {
            ratings: RatingService::new(ports.store.clone(), auditor.clone(), ports.clock.clone()),
            transfers: TransferService::new(ports.store.clone(), auditor.clone(), ports.clock.clone()),
            levels: LevelService::new(&ports, cycles.clone(), auditor.clone()),
            admin: AdminService::new(&ports, auditor.clone()),
            players: PlayerService::new(ports.players.clone()),
            cycles,
            auditor,
            settings: ports.settings,
            store: ports.store,
        }
    }

    /// Seeds the system configuration on first start and returns the stored snapshot.
    pub async fn bootstrap(&self, defaults: &SystemConfig) -> Result<SystemConfig> {
        defaults.validate()?;
        self.settings.ensure_system_config(defaults).await
    }

    /// The current configuration snapshot. Callers pass it down explicitly.
    pub async fn config(&self) -> Result<SystemConfig> {
        self.settings.system_config().await
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<dyn SettingsRepo> {
        &self.settings
    }
}

/// Locks two players in ascending id order so concurrent pairs never deadlock.
pub(crate) async fn lock_pair(tx: &mut dyn LedgerTx, first: PlayerId, second: PlayerId) -> Result<(Player, Player)> {
    let (low, high) = if first <= second { (first, second) } else { (second, first) };
    let low_player = tx.lock_player(low).await?.ok_or_else(|| DomainError::not_found("player", low))?;
    let high_player = tx.lock_player(high).await?.ok_or_else(|| DomainError::not_found("player", high))?;
    if first <= second {
        Ok((low_player, high_player))
    } else {
        Ok((high_player, low_player))
    }
}
