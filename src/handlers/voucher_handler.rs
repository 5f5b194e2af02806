//! Voucher Handler
//!
//! Credits a voucher whose validity the voucher service already decided.

use std::sync::Arc;

use crate::domain::{DomainError, OperationContext, TransactionType};
use crate::error::LedgerResult;
use crate::idempotency::IdempotencyResolver;
use crate::policy::LimitKind;

use super::gift_handler::{post_credit, CreditPosting, Credited};
use super::{ensure_replay_matches, parse_amount, EngineDeps, VoucherCommand, VoucherResult};

/// Handler for voucher redemptions
pub struct VoucherHandler {
    deps: Arc<EngineDeps>,
}

impl VoucherHandler {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    #[tracing::instrument(
        name = "redeem_voucher",
        skip(self, command, context),
        fields(account_id = %command.account_id, amount = command.amount)
    )]
    pub async fn execute(
        &self,
        command: VoucherCommand,
        context: &OperationContext,
    ) -> LedgerResult<VoucherResult> {
        let amount = parse_amount(command.amount)?;
        let voucher_code = command.voucher_code.trim();
        if voucher_code.is_empty() {
            return Err(DomainError::validation("voucher_code is required").into());
        }

        let reference = IdempotencyResolver::normalize(command.external_reference.as_deref())?;
        if let Some(existing) = self.deps.idempotency.resolve(reference.as_deref()).await? {
            ensure_replay_matches(
                &existing,
                &[TransactionType::VoucherRedemption],
                command.account_id,
            )?;
            return Ok(VoucherResult {
                transaction: existing,
                replayed: true,
            });
        }

        let limits = &self.deps.config.policy.limits;
        limits.validate_amount(LimitKind::Voucher, amount)?;
        limits
            .check_daily_limit(
                self.deps.store.as_ref(),
                command.account_id,
                LimitKind::Voucher,
                amount,
                chrono::Utc::now(),
            )
            .await?;

        let posting = CreditPosting {
            account_id: command.account_id,
            amount,
            transaction_type: TransactionType::VoucherRedemption,
            description: Some(format!("Voucher {}", voucher_code)),
            payment_instructions: Some(serde_json::json!({ "voucher_code": voucher_code })),
            reference,
        };

        match post_credit(&self.deps, posting).await? {
            Credited::Created(tx) => {
                self.deps.record_created(&[&tx], context).await;
                tracing::info!(transaction_id = %tx.id, voucher_code, "Voucher redeemed");
                Ok(VoucherResult {
                    transaction: tx,
                    replayed: false,
                })
            }
            Credited::Duplicate(winner) => {
                ensure_replay_matches(
                    &winner,
                    &[TransactionType::VoucherRedemption],
                    command.account_id,
                )?;
                Ok(VoucherResult {
                    transaction: winner,
                    replayed: true,
                })
            }
        }
    }
}
