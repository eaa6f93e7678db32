//! # larp-ledger
//!
//! Loads configuration, picks a storage backend, seeds the system
//! configuration and serves the HTTP API until interrupted.

use std::sync::Arc;

use anyhow::Context;
use api_adapters::http::{router, AppState};
use configs::{AppConfig, ExposeSecret, LedgerDefaults, LogConfig};
use domains::{Clock, SystemClock, SystemConfig};
use services::{Ledger, Ports};
use storage_adapters::MemoryStore;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn seed_config(defaults: &LedgerDefaults) -> SystemConfig {
    SystemConfig {
        formula_a: defaults.formula_a,
        formula_b: defaults.formula_b,
        default_cycle_duration_minutes: defaults.cycle_duration_minutes,
        default_rating_timeout_minutes: defaults.rating_timeout_minutes,
    }
}

async fn connect_storage(config: &AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Ports> {
    let Some(url) = config.database_url.as_ref() else {
        warn!("no database_url configured, ledger state will not survive a restart");
        return Ok(Ports::from_store(Arc::new(MemoryStore::new()), clock));
    };

    postgres_ports(url.expose_secret(), config, clock).await
}

#[cfg(feature = "db-postgres")]
async fn postgres_ports(url: &str, config: &AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Ports> {
    let store = storage_adapters::PgLedgerStore::connect(url, config.db_max_connections)
        .await
        .context("connecting to postgres")?;
    if config.migrate_on_start {
        store.migrate().await.context("running migrations")?;
    }
    Ok(Ports::from_store(Arc::new(store), clock))
}

#[cfg(not(feature = "db-postgres"))]
async fn postgres_ports(_url: &str, _config: &AppConfig, _clock: Arc<dyn Clock>) -> anyhow::Result<Ports> {
    anyhow::bail!("database_url is set but this build has no postgres support (feature `db-postgres`)")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_tracing(&config.log);

    let ports = connect_storage(&config, Arc::new(SystemClock)).await?;
    let ledger = Ledger::new(ports);

    let system = ledger
        .bootstrap(&seed_config(&config.defaults))
        .await
        .context("seeding system configuration")?;
    info!(
        formula_a = system.formula_a,
        formula_b = system.formula_b,
        cycle_minutes = system.default_cycle_duration_minutes,
        cooldown_minutes = system.default_rating_timeout_minutes,
        "system configuration loaded"
    );
    let cycle = ledger.cycles.ensure_active_cycle(&system).await.context("opening game cycle")?;
    info!(cycle_id = cycle.id, cycle_number = cycle.cycle_number, "active cycle ready");

    if config.admin_token.is_none() {
        warn!("no admin_token configured, admin routes will refuse every request");
    }
    let admin_token = config.admin_token.as_ref().map(|t| t.expose_secret().to_owned());
    let app = router(AppState::new(ledger, admin_token), config.request_timeout());

    let listener = tokio::net::TcpListener::bind(config.server_addr)
        .await
        .with_context(|| format!("binding {}", config.server_addr))?;
    info!(addr = %config.server_addr, "larp-ledger listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("larp-ledger stopped");
    Ok(())
}
