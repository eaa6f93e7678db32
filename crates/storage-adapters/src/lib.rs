//! # Storage Adapters
//!
//! Implementations of the `domains` ports. The in-memory store is always
//! available; the Postgres store is compiled with the `db-postgres` feature.

pub mod memory;

#[cfg(feature = "db-postgres")]
pub mod postgres;

pub use memory::{FailPoint, MemoryStore};

#[cfg(feature = "db-postgres")]
pub use postgres::PgLedgerStore;
