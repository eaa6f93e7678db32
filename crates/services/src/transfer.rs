//! # Transfer Ledger
//!
//! Moves balance between two players. The sender's balance is checked under
//! its row lock, in the same transaction as the debit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domains::{
    Clock, CycleId, DenialReason, DomainError, LedgerStore, LedgerTx, NewTransferEntry, OperationType, PlayerId,
    Result, SystemConfig, TransferLedgerEntry, TransferOutcome,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::audit::Auditor;
use crate::cycle;
use crate::guard;
use crate::lock_pair;

pub const DEFAULT_DESCRIPTION: &str = "manual transfer";

pub fn validate_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(DomainError::Validation(format!("transfer amount must be positive, got {amount}")));
    }
    Ok(())
}

/// Debits `sender_id`, credits `receiver_id` and appends the transfer row.
pub async fn apply_transfer(
    tx: &mut dyn LedgerTx,
    sender_id: PlayerId,
    receiver_id: PlayerId,
    cycle_id: CycleId,
    amount: i64,
    description: &str,
    now: DateTime<Utc>,
) -> Result<TransferOutcome> {
    validate_amount(amount)?;
    guard::ensure_distinct(sender_id, receiver_id)?;

    let (sender, receiver) = lock_pair(&mut *tx, sender_id, receiver_id).await?;
    if sender.balance < amount {
        return Err(DomainError::Denied(DenialReason::InsufficientBalance));
    }

    let ledger_id = tx
        .insert_transfer(NewTransferEntry {
            sender_id,
            receiver_id,
            amount,
            cycle_id,
            description: description.to_owned(),
            created_at: now,
        })
        .await?;
    tx.adjust_balance(sender_id, -amount).await?;
    tx.adjust_balance(receiver_id, amount).await?;

    Ok(TransferOutcome {
        ledger_id,
        sender_balance: sender.balance - amount,
        receiver_balance: receiver.balance + amount,
    })
}

#[derive(Clone)]
pub struct TransferService {
    store: Arc<dyn LedgerStore>,
    auditor: Auditor,
    clock: Arc<dyn Clock>,
}

impl TransferService {
    pub fn new(store: Arc<dyn LedgerStore>, auditor: Auditor, clock: Arc<dyn Clock>) -> Self {
        Self { store, auditor, clock }
    }

    #[instrument(skip(self, description, config))]
    pub async fn submit_transfer(
        &self,
        sender_id: PlayerId,
        receiver_id: PlayerId,
        amount: i64,
        description: Option<&str>,
        config: &SystemConfig,
    ) -> Result<TransferOutcome> {
        validate_amount(amount)?;
        guard::ensure_distinct(sender_id, receiver_id)?;

        let mut tx = self.store.begin().await?;
        let now = self.clock.now();
        let cycle = cycle::cycle_for_write(tx.as_mut(), config, now).await?;
        let description = description.unwrap_or(DEFAULT_DESCRIPTION);
        let applied = apply_transfer(tx.as_mut(), sender_id, receiver_id, cycle.id, amount, description, now).await;
        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.denial().is_some() {
                    warn!(sender_id, receiver_id, amount, error = %err, "transfer denied");
                }
                return Err(err);
            }
        };
        tx.commit().await?;

        info!(sender_id, receiver_id, amount, cycle_id = cycle.id, ledger_id = outcome.ledger_id, "transfer applied");
        self.auditor
            .record(OperationType::RatingTransfer, Some(sender_id), Some(receiver_id), json!({ "amount": amount }))
            .await;
        Ok(outcome)
    }

    pub async fn transfers_of(&self, player_id: PlayerId) -> Result<Vec<TransferLedgerEntry>> {
        self.store.transfers_of(player_id).await
    }
}
