//! Command Handlers module
//!
//! One handler per money movement. Each handler resolves idempotency,
//! applies the limit policy, and runs its writes inside store units.

mod commands;
mod gift_handler;
mod payment_handler;
mod settlement_handler;
mod topup_handler;
mod transfer_handler;
mod voucher_handler;
mod withdrawal_handler;

pub use commands::*;
pub use gift_handler::GiftHandler;
pub use payment_handler::PaymentHandler;
pub use settlement_handler::SettlementHandler;
pub use topup_handler::TopupHandler;
pub use transfer_handler::TransferHandler;
pub use voucher_handler::VoucherHandler;
pub use withdrawal_handler::WithdrawalHandler;

use std::future::Future;
use std::sync::Arc;

use crate::audit::{AuditRecorder, StatusChange};
use crate::config::EngineConfig;
use crate::domain::{
    Amount, DomainError, OperationContext, Transaction, TransactionStatus,
    TransactionType,
};
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::{GatewayError, SettlementGateway};
use crate::idempotency::IdempotencyResolver;
use crate::store::{LedgerStore, LedgerUnit, StoreError};
use uuid::Uuid;

/// Collaborators shared by every handler
pub struct EngineDeps {
    pub store: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn SettlementGateway>,
    pub audit: Arc<dyn AuditRecorder>,
    pub idempotency: IdempotencyResolver,
    pub config: EngineConfig,
}

impl EngineDeps {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn SettlementGateway>,
        audit: Arc<dyn AuditRecorder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            idempotency: IdempotencyResolver::new(store.clone()),
            store,
            gateway,
            audit,
            config,
        }
    }

    /// Hand a status change to the recorder.
    ///
    /// Runs after commit, so a recorder failure is logged and swallowed.
    pub async fn record(&self, change: StatusChange) {
        let transaction_id = change.transaction_id;
        let to_status = change.to_status;
        if let Err(e) = self.audit.record_status_change(change).await {
            tracing::error!(
                transaction_id = %transaction_id,
                to_status = %to_status,
                error = %e,
                "Failed to record status change"
            );
        }
    }

    /// Record the creation of freshly committed rows
    pub async fn record_created(&self, rows: &[&Transaction], context: &OperationContext) {
        for tx in rows {
            self.record(
                StatusChange::new(tx.id, None, tx.status)
                    .reason(format!("{} created", tx.transaction_type))
                    .context(context),
            )
            .await;
        }
    }

    /// Run one gateway call under the configured timeout
    pub async fn call_gateway<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }
}

/// Parse a raw amount into a strictly positive [`Amount`].
pub(crate) fn parse_amount(units: i64) -> Result<Amount, DomainError> {
    Amount::new(units).map_err(|e| DomainError::validation(format!("Invalid amount: {}", e)))
}

/// Apply a status transition, logging rejected ones.
pub(crate) fn apply_transition(
    tx: &mut Transaction,
    next: TransactionStatus,
) -> Result<TransactionStatus, DomainError> {
    let (id, from) = (tx.id, tx.status);
    tx.transition_to(next).map_err(|e| {
        tracing::warn!(
            transaction_id = %id,
            from = %from,
            to = %next,
            "Rejected status transition"
        );
        e
    })
}

/// A replayed reference must belong to the same kind of request.
pub(crate) fn ensure_replay_matches(
    existing: &Transaction,
    expected: &[TransactionType],
    account_id: Uuid,
) -> Result<(), DomainError> {
    if !expected.contains(&existing.transaction_type) || existing.account_id != account_id {
        return Err(DomainError::validation(format!(
            "external reference {} belongs to a different request",
            existing.external_reference_id.as_deref().unwrap_or_default()
        )));
    }
    Ok(())
}

/// Unlocked existence check used before gateway calls that move no balance
pub(crate) async fn ensure_account_active(store: &dyn LedgerStore, id: Uuid) -> LedgerResult<()> {
    match store.find_account(id).await? {
        Some(account) if !account.is_deleted() => Ok(()),
        _ => Err(DomainError::AccountNotFound(id).into()),
    }
}

/// Abort a unit after a failed step, keeping the original error.
pub(crate) async fn abort_with(unit: Box<dyn LedgerUnit>, err: LedgerError) -> LedgerError {
    if let Err(abort_err) = unit.abort().await {
        tracing::error!(error = %abort_err, "Failed to abort ledger unit");
    }
    err
}

/// Abort a unit whose staging failed.
///
/// A duplicate reference raised by the insert itself resolves to the winner,
/// the same as one raised at commit.
pub(crate) async fn abort_or_recover(
    deps: &EngineDeps,
    unit: Box<dyn LedgerUnit>,
    err: LedgerError,
) -> LedgerResult<Transaction> {
    match abort_with(unit, err).await {
        LedgerError::Store(duplicate @ StoreError::DuplicateExternalReference(_)) => {
            deps.idempotency.recover_duplicate(duplicate).await
        }
        other => Err(other),
    }
}
