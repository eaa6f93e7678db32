//! # api-adapters
//!
//! Inbound adapters. `metrics` is transport-agnostic; the JSON HTTP surface
//! lives behind the `web-axum` feature.

pub mod metrics;

#[cfg(feature = "web-axum")]
pub mod http;

pub use metrics::LedgerMetrics;
