//! Best-effort audit trail.
//!
//! Audit writes happen after the business transaction has committed and never
//! change its outcome: a failed write is logged and dropped.

use std::sync::Arc;

use domains::{AuditLog, NewOperationLog, OperationLogEntry, OperationType, PlayerId, Result};
use serde_json::Value;
use tracing::warn;

#[derive(Clone)]
pub struct Auditor {
    log: Arc<dyn AuditLog>,
}

impl Auditor {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }

    pub async fn record(
        &self,
        operation_type: OperationType,
        initiator_id: Option<PlayerId>,
        target_id: Option<PlayerId>,
        details: Value,
    ) {
        let entry = NewOperationLog { operation_type, initiator_id, target_id, details };
        if let Err(err) = self.log.log_operation(entry).await {
            warn!(operation = operation_type.as_str(), error = %err, "failed to write audit log entry");
        }
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<OperationLogEntry>> {
        self.log.recent_operations(limit).await
    }
}
