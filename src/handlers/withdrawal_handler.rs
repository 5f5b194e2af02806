//! Withdrawal Handler
//!
//! Two-step saga: the debit commits first, then the disbursement is sent.
//! A failed disbursement is compensated by a separate credit-back unit that
//! leaves the row FAILED.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::StatusChange;
use crate::domain::{
    BankDetails, OperationContext, Transaction, TransactionStatus, TransactionType,
};
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::{Disbursement, DisbursementRequest, GatewayError, GatewayStatus};
use crate::idempotency::IdempotencyResolver;
use crate::policy::LimitKind;
use crate::store::LedgerUnit;

use super::{
    abort_or_recover, abort_with, apply_transition, ensure_replay_matches, parse_amount,
    EngineDeps, ReconciliationReport, WithdrawalCommand, WithdrawalResult,
};

/// Idempotency key of the compensating credit for a withdrawal
pub fn refund_key(transaction_id: Uuid) -> String {
    format!("{}:refund", transaction_id)
}

/// Handler for withdrawals and their reconciliation
pub struct WithdrawalHandler {
    deps: Arc<EngineDeps>,
}

impl WithdrawalHandler {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Execute the withdrawal command
    #[tracing::instrument(
        name = "create_withdrawal",
        skip(self, command, context),
        fields(account_id = %command.account_id, amount = command.amount)
    )]
    pub async fn execute(
        &self,
        command: WithdrawalCommand,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalResult> {
        let amount = parse_amount(command.amount)?;
        command.bank_details.validate()?;

        let reference = IdempotencyResolver::normalize(command.external_reference.as_deref())?;
        if let Some(existing) = self.deps.idempotency.resolve(reference.as_deref()).await? {
            ensure_replay_matches(&existing, &[TransactionType::Withdrawal], command.account_id)?;
            return Ok(WithdrawalResult {
                transaction: existing,
                replayed: true,
            });
        }

        let limits = &self.deps.config.policy.limits;
        limits.validate_amount(LimitKind::Withdrawal, amount)?;
        limits
            .check_daily_limit(
                self.deps.store.as_ref(),
                command.account_id,
                LimitKind::Withdrawal,
                amount,
                Utc::now(),
            )
            .await?;

        let mut tx = Transaction::new(
            command.account_id,
            TransactionType::Withdrawal,
            amount,
            0,
            TransactionStatus::Pending,
        )
        .with_external_reference(reference);
        tx.description = command.description;
        tx.payment_instructions = Some(serde_json::json!({ "bank_details": command.bank_details }));

        // Unit 1: debit now, the disbursement is assumed to go through.
        let mut unit = self.deps.store.begin().await?;
        let staged = stage_debit(unit.as_mut(), &tx).await;
        let lost_race = match staged {
            Ok(()) => match unit.commit().await {
                Ok(()) => None,
                Err(e) => Some(self.deps.idempotency.recover_duplicate(e).await?),
            },
            Err(e) => Some(abort_or_recover(&self.deps, unit, e).await?),
        };
        if let Some(winner) = lost_race {
            ensure_replay_matches(&winner, &[TransactionType::Withdrawal], command.account_id)?;
            return Ok(WithdrawalResult {
                transaction: winner,
                replayed: true,
            });
        }
        self.deps.record_created(&[&tx], context).await;
        tracing::info!(transaction_id = %tx.id, "Withdrawal debited, sending disbursement");

        let tx = self.dispatch(tx, &command.bank_details, context).await?;
        Ok(WithdrawalResult {
            transaction: tx,
            replayed: false,
        })
    }

    /// Send the disbursement and record its outcome.
    ///
    /// On gateway failure the debit is compensated and the gateway error is
    /// returned to the caller.
    async fn dispatch(
        &self,
        tx: Transaction,
        bank_details: &BankDetails,
        context: &OperationContext,
    ) -> LedgerResult<Transaction> {
        let request = DisbursementRequest {
            transaction_id: tx.id,
            amount: tx.amount,
            bank_details: bank_details.clone(),
            idempotency_key: tx.id.to_string(),
        };

        let outcome = self
            .deps
            .call_gateway(self.deps.gateway.create_disbursement(request))
            .await
            .and_then(|disbursement| match disbursement.status {
                GatewayStatus::Failed => Err(GatewayError::Rejected(format!(
                    "disbursement {} failed",
                    disbursement.gateway_ref
                ))),
                _ => Ok(disbursement),
            });

        match outcome {
            Ok(disbursement) => self.record_dispatch(tx.id, disbursement, context).await,
            Err(e) => {
                tracing::warn!(transaction_id = %tx.id, error = %e, "Disbursement failed, compensating");
                self.refund(tx.id, &e.to_string(), context).await?;
                Err(e.into())
            }
        }
    }

    /// Unit 2: store the gateway reference and advance the status.
    async fn record_dispatch(
        &self,
        transaction_id: Uuid,
        disbursement: Disbursement,
        context: &OperationContext,
    ) -> LedgerResult<Transaction> {
        let next = match disbursement.status {
            GatewayStatus::Completed => TransactionStatus::Completed,
            _ => TransactionStatus::Processing,
        };

        let mut unit = self.deps.store.begin().await?;
        let mut tx = unit.lock_transaction_for_update(transaction_id).await?;
        if tx.status != TransactionStatus::Pending {
            // Settled concurrently (reconciliation run)
            unit.abort().await?;
            return Ok(tx);
        }

        tx.external_payment_id = Some(disbursement.gateway_ref.clone());
        let previous = match apply_transition(&mut tx, next) {
            Ok(previous) => previous,
            Err(e) => return Err(abort_with(unit, e.into()).await),
        };
        if let Err(e) = unit.update_transaction(&tx).await {
            return Err(abort_with(unit, e.into()).await);
        }
        unit.commit().await?;

        self.deps
            .record(
                StatusChange::new(tx.id, Some(previous), tx.status)
                    .reason("disbursement accepted by gateway")
                    .context(context)
                    .metadata(serde_json::json!({ "gateway_ref": disbursement.gateway_ref })),
            )
            .await;
        tracing::info!(transaction_id = %tx.id, status = %tx.status, "Disbursement dispatched");
        Ok(tx)
    }

    /// Compensating unit: credit the amount back and mark the row FAILED.
    ///
    /// Only acts on rows still PENDING or PROCESSING, so running it twice
    /// credits once.
    pub async fn refund(
        &self,
        transaction_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<Transaction> {
        let mut unit = self.deps.store.begin().await?;
        let mut tx = unit.lock_transaction_for_update(transaction_id).await?;
        if !matches!(
            tx.status,
            TransactionStatus::Pending | TransactionStatus::Processing
        ) {
            unit.abort().await?;
            tracing::info!(
                transaction_id = %tx.id,
                status = %tx.status,
                "Withdrawal already settled, compensation skipped"
            );
            return Ok(tx);
        }

        let staged = stage_refund(unit.as_mut(), &mut tx, reason).await;
        let previous = match staged {
            Ok(previous) => previous,
            Err(e) => return Err(abort_with(unit, e).await),
        };
        unit.commit().await?;

        self.deps
            .record(
                StatusChange::new(tx.id, Some(previous), TransactionStatus::Failed)
                    .reason(reason)
                    .context(context)
                    .metadata(serde_json::json!({
                        "compensation_key": refund_key(tx.id),
                        "refunded_amount": tx.amount,
                    })),
            )
            .await;
        tracing::info!(transaction_id = %tx.id, amount = tx.amount, "Withdrawal refunded");
        Ok(tx)
    }

    /// Mark a withdrawal COMPLETED once the gateway confirms settlement.
    async fn complete(&self, transaction_id: Uuid, context: &OperationContext) -> LedgerResult<Transaction> {
        let mut unit = self.deps.store.begin().await?;
        let mut tx = unit.lock_transaction_for_update(transaction_id).await?;
        if tx.is_terminal() || tx.status == TransactionStatus::Failed {
            unit.abort().await?;
            return Ok(tx);
        }

        let previous = match apply_transition(&mut tx, TransactionStatus::Completed) {
            Ok(previous) => previous,
            Err(e) => return Err(abort_with(unit, e.into()).await),
        };
        if let Err(e) = unit.update_transaction(&tx).await {
            return Err(abort_with(unit, e.into()).await);
        }
        unit.commit().await?;

        self.deps
            .record(
                StatusChange::new(tx.id, Some(previous), TransactionStatus::Completed)
                    .reason("disbursement settled")
                    .context(context),
            )
            .await;
        Ok(tx)
    }

    /// Settle withdrawals stuck in PENDING or PROCESSING for longer than `older_than`.
    #[tracing::instrument(name = "reconcile_withdrawals", skip(self, context))]
    pub async fn reconcile(
        &self,
        older_than: chrono::Duration,
        context: &OperationContext,
    ) -> LedgerResult<ReconciliationReport> {
        let cutoff = Utc::now() - older_than;
        let stale = self.deps.store.find_stale_withdrawals(cutoff).await?;

        let mut report = ReconciliationReport {
            examined: stale.len(),
            ..Default::default()
        };

        for tx in stale {
            let result = match (tx.external_payment_id.clone(), tx.status) {
                // Debited but the disbursement never reached the gateway
                (None, TransactionStatus::Pending) => self.redispatch(tx, context, &mut report).await,
                (Some(gateway_ref), _) => {
                    self.settle_from_gateway(tx, &gateway_ref, context, &mut report)
                        .await
                }
                (None, _) => {
                    tracing::warn!(
                        transaction_id = %tx.id,
                        status = %tx.status,
                        "Withdrawal has no gateway reference, leaving for manual review"
                    );
                    report.still_pending += 1;
                    Ok(())
                }
            };

            if let Err(e) = result {
                report.errors += 1;
                tracing::error!(error = %e, "Withdrawal reconciliation step failed");
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                redispatched = report.redispatched,
                completed = report.completed,
                refunded = report.refunded,
                still_pending = report.still_pending,
                errors = report.errors,
                "Withdrawal reconciliation finished"
            );
        }
        Ok(report)
    }

    async fn redispatch(
        &self,
        tx: Transaction,
        context: &OperationContext,
        report: &mut ReconciliationReport,
    ) -> LedgerResult<()> {
        let bank_details = bank_details_of(&tx)?;
        let id = tx.id;
        report.redispatched += 1;
        match self.dispatch(tx, &bank_details, context).await {
            Ok(settled) => {
                if settled.status == TransactionStatus::Completed {
                    report.completed += 1;
                }
                Ok(())
            }
            Err(LedgerError::Gateway(e)) => {
                tracing::warn!(transaction_id = %id, error = %e, "Re-dispatch failed, withdrawal refunded");
                report.refunded += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn settle_from_gateway(
        &self,
        tx: Transaction,
        gateway_ref: &str,
        context: &OperationContext,
        report: &mut ReconciliationReport,
    ) -> LedgerResult<()> {
        // Status queries run outside any lock.
        let status = self
            .deps
            .call_gateway(self.deps.gateway.query_status(gateway_ref))
            .await?;

        match status {
            GatewayStatus::Completed => {
                self.complete(tx.id, context).await?;
                report.completed += 1;
            }
            GatewayStatus::Failed => {
                self.refund(tx.id, "disbursement failed at gateway", context)
                    .await?;
                report.refunded += 1;
            }
            GatewayStatus::Pending => {
                report.still_pending += 1;
            }
        }
        Ok(())
    }
}

async fn stage_debit(unit: &mut dyn LedgerUnit, tx: &Transaction) -> LedgerResult<()> {
    let mut account = unit.lock_account_for_update(tx.account_id).await?;
    account.debit(tx.amount()?)?;
    unit.insert_transaction(tx).await?;
    unit.update_account(&account).await?;
    Ok(())
}

/// Transaction row is already locked; lock the account, credit it back and fail the row.
async fn stage_refund(
    unit: &mut dyn LedgerUnit,
    tx: &mut Transaction,
    reason: &str,
) -> LedgerResult<TransactionStatus> {
    let mut account = unit.lock_account_for_update(tx.account_id).await?;
    account.credit(tx.amount()?)?;

    let previous = apply_transition(tx, TransactionStatus::Failed)?;
    tx.failure_reason = Some(reason.to_string());

    unit.update_account(&account).await?;
    unit.update_transaction(tx).await?;
    Ok(previous)
}

fn bank_details_of(tx: &Transaction) -> LedgerResult<BankDetails> {
    tx.payment_instructions
        .as_ref()
        .and_then(|value| value.get("bank_details"))
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| LedgerError::internal(format!("unreadable bank details on {}: {}", tx.id, e)))?
        .ok_or_else(|| LedgerError::internal(format!("withdrawal {} has no bank details", tx.id)))
}
