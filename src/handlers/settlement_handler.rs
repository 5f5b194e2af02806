//! Settlement Handler
//!
//! Gateway callbacks for collected funds (confirm / reject) and the manual
//! FAILED → PENDING retry.

use std::sync::Arc;
use uuid::Uuid;

use crate::audit::StatusChange;
use crate::domain::{
    DomainError, OperationContext, Transaction, TransactionStatus, TransactionType,
};
use crate::error::LedgerResult;
use crate::store::LedgerUnit;

use super::{abort_with, apply_transition, EngineDeps};

/// Handler for settlement of gateway-collected transactions
pub struct SettlementHandler {
    deps: Arc<EngineDeps>,
}

/// What a settlement step did to the row
struct Settled {
    tx: Transaction,
    previous: TransactionStatus,
}

impl SettlementHandler {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Mark a PENDING topup or payment COMPLETED.
    ///
    /// This is the only place a topup credits the wallet.
    #[tracing::instrument(name = "confirm_payment", skip(self, context))]
    pub async fn confirm(
        &self,
        transaction_id: Uuid,
        external_payment_id: Option<String>,
        context: &OperationContext,
    ) -> LedgerResult<Transaction> {
        let mut unit = self.deps.store.begin().await?;
        let staged = stage_confirm(unit.as_mut(), transaction_id, external_payment_id).await;
        let settled = match staged {
            Ok(settled) => settled,
            Err(e) => return Err(abort_with(unit, e).await),
        };
        unit.commit().await?;

        let tx = settled.tx;
        self.deps
            .record(
                StatusChange::new(tx.id, Some(settled.previous), tx.status)
                    .reason("payment confirmed by gateway")
                    .context(context)
                    .metadata(serde_json::json!({ "external_payment_id": tx.external_payment_id })),
            )
            .await;
        tracing::info!(
            transaction_id = %tx.id,
            account_id = %tx.account_id,
            amount = tx.amount,
            transaction_type = %tx.transaction_type,
            "Payment confirmed"
        );
        Ok(tx)
    }

    /// Mark a PENDING topup or payment FAILED. No balance effect.
    #[tracing::instrument(name = "reject_payment", skip(self, context))]
    pub async fn reject(
        &self,
        transaction_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<Transaction> {
        let settled = self
            .transition_collected(transaction_id, TransactionStatus::Failed, |tx| {
                tx.failure_reason = Some(reason.to_string());
            })
            .await?;

        let tx = settled.tx;
        self.deps
            .record(
                StatusChange::new(tx.id, Some(settled.previous), tx.status)
                    .reason(reason)
                    .context(context),
            )
            .await;
        tracing::info!(transaction_id = %tx.id, reason, "Payment rejected");
        Ok(tx)
    }

    /// Manual FAILED → PENDING retry of a topup or externally funded payment.
    #[tracing::instrument(name = "retry_transaction", skip(self, context))]
    pub async fn retry(
        &self,
        transaction_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<Transaction> {
        let settled = self
            .transition_collected(transaction_id, TransactionStatus::Pending, |tx| {
                tx.failure_reason = None;
            })
            .await?;

        let tx = settled.tx;
        self.deps
            .record(
                StatusChange::new(tx.id, Some(settled.previous), tx.status)
                    .reason(reason)
                    .context(context),
            )
            .await;
        tracing::info!(transaction_id = %tx.id, "Transaction queued for retry");
        Ok(tx)
    }

    /// Lock a gateway-collected row and move it to `next` without touching balances.
    async fn transition_collected<F>(
        &self,
        transaction_id: Uuid,
        next: TransactionStatus,
        update: F,
    ) -> LedgerResult<Settled>
    where
        F: FnOnce(&mut Transaction),
    {
        let mut unit = self.deps.store.begin().await?;
        let mut tx = match unit.lock_transaction_for_update(transaction_id).await {
            Ok(tx) => tx,
            Err(e) => return Err(abort_with(unit, e.into()).await),
        };

        let operation = match next {
            TransactionStatus::Pending => "retry_transaction",
            _ => "reject_payment",
        };
        if let Err(e) = ensure_collected(&tx, operation) {
            return Err(abort_with(unit, e.into()).await);
        }
        // Reject only applies to rows awaiting collection.
        if next == TransactionStatus::Failed && tx.status != TransactionStatus::Pending {
            let e = rejected_transition(&tx, next);
            return Err(abort_with(unit, e.into()).await);
        }

        let previous = match apply_transition(&mut tx, next) {
            Ok(previous) => previous,
            Err(e) => return Err(abort_with(unit, e.into()).await),
        };
        update(&mut tx);

        if let Err(e) = unit.update_transaction(&tx).await {
            return Err(abort_with(unit, e.into()).await);
        }
        unit.commit().await?;
        Ok(Settled { tx, previous })
    }
}

async fn stage_confirm(
    unit: &mut dyn LedgerUnit,
    transaction_id: Uuid,
    external_payment_id: Option<String>,
) -> LedgerResult<Settled> {
    // Transaction row first, then the account: same order as every other unit.
    let mut tx = unit.lock_transaction_for_update(transaction_id).await?;
    ensure_collected(&tx, "confirm_payment")?;
    if tx.status != TransactionStatus::Pending {
        return Err(rejected_transition(&tx, TransactionStatus::Completed).into());
    }

    let previous = apply_transition(&mut tx, TransactionStatus::Completed)?;
    if let Some(external_payment_id) = external_payment_id {
        tx.external_payment_id = Some(external_payment_id);
    }

    if tx.transaction_type == TransactionType::Topup {
        let mut account = unit.lock_account_for_update(tx.account_id).await?;
        account.credit(tx.amount()?)?;
        unit.update_account(&account).await?;
    }
    unit.update_transaction(&tx).await?;

    Ok(Settled { tx, previous })
}

/// Topups and externally funded payments are the only gateway-collected rows.
fn ensure_collected(tx: &Transaction, operation: &'static str) -> Result<(), DomainError> {
    let wallet_funded = tx
        .payment_method
        .map(|method| method.is_wallet_funded())
        .unwrap_or(false);
    if !tx.transaction_type.is_gateway_collected() || wallet_funded {
        return Err(DomainError::UnsupportedOperation {
            operation,
            transaction_type: tx.transaction_type,
        });
    }
    Ok(())
}

fn rejected_transition(tx: &Transaction, to: TransactionStatus) -> DomainError {
    tracing::warn!(
        transaction_id = %tx.id,
        from = %tx.status,
        to = %to,
        "Rejected status transition"
    );
    DomainError::InvalidStatusTransition {
        from: tx.status,
        to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Amount, PaymentMethod};

    fn row(transaction_type: TransactionType, method: Option<PaymentMethod>) -> Transaction {
        let mut tx = Transaction::new(
            Uuid::new_v4(),
            transaction_type,
            Amount::new(10_000).unwrap(),
            0,
            TransactionStatus::Pending,
        );
        tx.payment_method = method;
        tx
    }

    #[test]
    fn test_only_gateway_collected_rows_settle() {
        assert!(ensure_collected(&row(TransactionType::Topup, Some(PaymentMethod::Qris)), "confirm_payment").is_ok());
        assert!(ensure_collected(
            &row(TransactionType::Payment, Some(PaymentMethod::VirtualAccount)),
            "confirm_payment"
        )
        .is_ok());

        let err = ensure_collected(
            &row(TransactionType::Payment, Some(PaymentMethod::WalletBalance)),
            "confirm_payment",
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::UnsupportedOperation { .. }));

        assert!(ensure_collected(&row(TransactionType::Withdrawal, None), "reject_payment").is_err());
    }
}
