//! Payment Handler
//!
//! Wallet-funded payments debit `total_amount` and complete in one unit.
//! Externally funded payments stay PENDING with a gateway bill attached until
//! `confirm_payment`.

use std::sync::Arc;

use crate::domain::{
    Amount, OperationContext, PaymentMethod, Transaction, TransactionStatus, TransactionType,
};
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::BillRequest;
use crate::idempotency::IdempotencyResolver;
use crate::policy::LimitKind;
use crate::store::LedgerUnit;

use super::{
    abort_or_recover, abort_with, ensure_account_active, ensure_replay_matches, parse_amount,
    EngineDeps, PaymentCommand, PaymentInstructions, PaymentResult,
};

/// Handler for payments
pub struct PaymentHandler {
    deps: Arc<EngineDeps>,
}

impl PaymentHandler {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Execute the payment command
    #[tracing::instrument(
        name = "create_payment",
        skip(self, command, context),
        fields(
            account_id = %command.account_id,
            amount = command.amount,
            method = %command.payment_method
        )
    )]
    pub async fn execute(
        &self,
        command: PaymentCommand,
        context: &OperationContext,
    ) -> LedgerResult<PaymentResult> {
        let amount = parse_amount(command.amount)?;

        let reference = IdempotencyResolver::normalize(command.external_reference.as_deref())?;
        if let Some(existing) = self.deps.idempotency.resolve(reference.as_deref()).await? {
            ensure_replay_matches(&existing, &[TransactionType::Payment], command.account_id)?;
            return Ok(replay(existing));
        }

        let policy = &self.deps.config.policy;
        policy.limits.validate_amount(LimitKind::Payment, amount)?;
        policy
            .limits
            .check_daily_limit(
                self.deps.store.as_ref(),
                command.account_id,
                LimitKind::Payment,
                amount,
                chrono::Utc::now(),
            )
            .await?;

        let fee = policy.fees.calculate_fee(command.payment_method, amount);
        let mut tx = Transaction::new(
            command.account_id,
            TransactionType::Payment,
            amount,
            fee,
            if command.payment_method.is_wallet_funded() {
                TransactionStatus::Completed
            } else {
                TransactionStatus::Pending
            },
        )
        .with_payment_method(command.payment_method)
        .with_external_reference(reference);
        tx.description = command.description;

        let (tx, instructions) = if command.payment_method.is_wallet_funded() {
            match self.pay_from_wallet(tx).await? {
                Ok(tx) => (tx, None),
                Err(winner) => {
                    ensure_replay_matches(&winner, &[TransactionType::Payment], command.account_id)?;
                    return Ok(replay(winner));
                }
            }
        } else {
            match self.pay_externally(tx, command.payment_method).await? {
                Ok((tx, instructions)) => (tx, Some(instructions)),
                Err(winner) => {
                    ensure_replay_matches(&winner, &[TransactionType::Payment], command.account_id)?;
                    return Ok(replay(winner));
                }
            }
        };

        self.deps.record_created(&[&tx], context).await;
        tracing::info!(
            transaction_id = %tx.id,
            status = %tx.status,
            fee = tx.fee,
            total_amount = tx.total_amount,
            "Payment created"
        );

        Ok(PaymentResult {
            transaction: tx,
            instructions,
            replayed: false,
        })
    }

    /// Debit `total_amount` under the account lease and complete immediately.
    ///
    /// `Ok(Err(winner))` means a concurrent request with the same reference won.
    async fn pay_from_wallet(
        &self,
        tx: Transaction,
    ) -> LedgerResult<Result<Transaction, Transaction>> {
        let mut unit = self.deps.store.begin().await?;
        if let Err(e) = stage_wallet_debit(unit.as_mut(), &tx).await {
            return Ok(Err(abort_or_recover(&self.deps, unit, e).await?));
        }
        match unit.commit().await {
            Ok(()) => Ok(Ok(tx)),
            Err(e) => Ok(Err(self.deps.idempotency.recover_duplicate(e).await?)),
        }
    }

    /// Create the gateway bill and persist the PENDING row with it.
    async fn pay_externally(
        &self,
        mut tx: Transaction,
        method: PaymentMethod,
    ) -> LedgerResult<Result<(Transaction, PaymentInstructions), Transaction>> {
        ensure_account_active(self.deps.store.as_ref(), tx.account_id).await?;

        let mut unit = self.deps.store.begin().await?;
        let bill = match self
            .deps
            .call_gateway(self.deps.gateway.create_payable_bill(BillRequest {
                transaction_id: tx.id,
                amount: tx.total_amount,
                method,
                description: tx.description.clone(),
            }))
            .await
        {
            Ok(bill) => bill,
            Err(e) => {
                tracing::warn!(transaction_id = %tx.id, error = %e, "Payment bill creation failed");
                return Err(abort_with(unit, e.into()).await);
            }
        };

        let instructions = PaymentInstructions {
            gateway_ref: bill.gateway_ref.clone(),
            instructions: bill.payment_instructions,
            expires_at: bill.expires_at,
        };
        tx.external_payment_id = Some(bill.gateway_ref);
        tx.payment_instructions = Some(serde_json::to_value(&instructions).map_err(|e| {
            LedgerError::internal(format!("Failed to serialize payment instructions: {}", e))
        })?);

        if let Err(e) = unit.insert_transaction(&tx).await {
            return Ok(Err(abort_or_recover(&self.deps, unit, e.into()).await?));
        }
        match unit.commit().await {
            Ok(()) => Ok(Ok((tx, instructions))),
            Err(e) => Ok(Err(self.deps.idempotency.recover_duplicate(e).await?)),
        }
    }
}

async fn stage_wallet_debit(unit: &mut dyn LedgerUnit, tx: &Transaction) -> LedgerResult<()> {
    let total: Amount = tx.total()?;
    let mut account = unit.lock_account_for_update(tx.account_id).await?;
    account.debit(total)?;
    unit.insert_transaction(tx).await?;
    unit.update_account(&account).await?;
    Ok(())
}

fn replay(existing: Transaction) -> PaymentResult {
    let instructions = PaymentInstructions::from_transaction(&existing);
    PaymentResult {
        transaction: existing,
        instructions,
        replayed: true,
    }
}
