//! domains/src/lib.rs
//!
//! Entities, error taxonomy and port definitions for the cycle-scoped rating ledger.

pub mod clock;
pub mod error;
pub mod models;
pub mod traits;

pub use clock::*;
pub use error::*;
pub use models::*;
pub use traits::*;
