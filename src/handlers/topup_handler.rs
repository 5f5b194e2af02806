//! Topup Handler
//!
//! Creates a PENDING topup with gateway payment instructions. The balance is
//! credited later, by `confirm_payment`.

use std::sync::Arc;

use crate::domain::{
    DomainError, OperationContext, Transaction, TransactionStatus, TransactionType,
};
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::BillRequest;
use crate::idempotency::IdempotencyResolver;
use crate::policy::LimitKind;

use super::{
    abort_or_recover, abort_with, ensure_account_active, ensure_replay_matches, parse_amount,
    EngineDeps, PaymentInstructions, TopupCommand, TopupResult,
};

/// Handler for wallet topups
pub struct TopupHandler {
    deps: Arc<EngineDeps>,
}

impl TopupHandler {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Execute the topup command
    #[tracing::instrument(
        name = "create_topup",
        skip(self, command, context),
        fields(account_id = %command.account_id, amount = command.amount)
    )]
    pub async fn execute(
        &self,
        command: TopupCommand,
        context: &OperationContext,
    ) -> LedgerResult<TopupResult> {
        let amount = parse_amount(command.amount)?;
        if command.payment_method.is_wallet_funded() {
            return Err(DomainError::validation(
                "a topup must be funded by an external payment method",
            )
            .into());
        }

        let reference = IdempotencyResolver::normalize(command.external_reference.as_deref())?;
        if let Some(existing) = self.deps.idempotency.resolve(reference.as_deref()).await? {
            ensure_replay_matches(&existing, &[TransactionType::Topup], command.account_id)?;
            return replay(existing);
        }

        let policy = &self.deps.config.policy;
        policy.limits.validate_amount(LimitKind::Topup, amount)?;
        policy
            .limits
            .check_daily_limit(
                self.deps.store.as_ref(),
                command.account_id,
                LimitKind::Topup,
                amount,
                chrono::Utc::now(),
            )
            .await?;
        ensure_account_active(self.deps.store.as_ref(), command.account_id).await?;

        let fee = policy.fees.calculate_fee(command.payment_method, amount);
        let mut tx = Transaction::new(
            command.account_id,
            TransactionType::Topup,
            amount,
            fee,
            TransactionStatus::Pending,
        )
        .with_payment_method(command.payment_method)
        .with_external_reference(reference);
        tx.description = command.description;

        let mut unit = self.deps.store.begin().await?;

        // The bill is requested inside the unit: a gateway failure leaves no row behind.
        let bill = match self
            .deps
            .call_gateway(self.deps.gateway.create_payable_bill(BillRequest {
                transaction_id: tx.id,
                amount: tx.total_amount,
                method: command.payment_method,
                description: tx.description.clone(),
            }))
            .await
        {
            Ok(bill) => bill,
            Err(e) => {
                tracing::warn!(transaction_id = %tx.id, error = %e, "Topup bill creation failed");
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
            let winner = abort_or_recover(&self.deps, unit, e.into()).await?;
            ensure_replay_matches(&winner, &[TransactionType::Topup], command.account_id)?;
            return replay(winner);
        }
        if let Err(e) = unit.commit().await {
            let winner = self.deps.idempotency.recover_duplicate(e).await?;
            ensure_replay_matches(&winner, &[TransactionType::Topup], command.account_id)?;
            return replay(winner);
        }

        self.deps.record_created(&[&tx], context).await;
        tracing::info!(
            transaction_id = %tx.id,
            fee = tx.fee,
            total_amount = tx.total_amount,
            "Topup created"
        );

        Ok(TopupResult {
            transaction: tx,
            instructions,
            replayed: false,
        })
    }
}

fn replay(existing: Transaction) -> LedgerResult<TopupResult> {
    let instructions = PaymentInstructions::from_transaction(&existing).ok_or_else(|| {
        LedgerError::internal(format!(
            "topup {} has no readable payment instructions",
            existing.id
        ))
    })?;
    Ok(TopupResult {
        transaction: existing,
        instructions,
        replayed: true,
    })
}
