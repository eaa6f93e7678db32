//! Prometheus counters for ledger outcomes.

use std::fmt;

use domains::DomainError;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
    pub outcome: String,
}

pub struct LedgerMetrics {
    registry: Registry,
    operations: Family<OperationLabels, Counter>,
}

impl LedgerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("ledger");
        let operations = Family::<OperationLabels, Counter>::default();
        registry.register("operations", "Ledger operations by outcome", operations.clone());
        Self { registry, operations }
    }

    /// Counts one call of `operation`. Denials are labelled with their reason,
    /// other failures with their error code.
    pub fn observe<T>(&self, operation: &str, result: &Result<T, DomainError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(err) => match err.denial() {
                Some(reason) => reason.as_str(),
                None => err.kind().code(),
            },
        };
        self.operations
            .get_or_create(&OperationLabels { operation: operation.to_owned(), outcome: outcome.to_owned() })
            .inc();
    }

    /// OpenMetrics text exposition.
    pub fn render(&self) -> Result<String, fmt::Error> {
        let mut out = String::new();
        encode(&mut out, &self.registry)?;
        Ok(out)
    }
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
