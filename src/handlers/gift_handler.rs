//! Gift Handler
//!
//! Wallet-to-wallet gifts post a linked GIFT_OUT / GIFT_IN pair with the
//! transfer locking discipline. Promotional gifts are a one-sided GIFT_IN
//! credit with no balance check.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    Amount, DomainError, OperationContext, Transaction, TransactionStatus, TransactionType,
};
use crate::error::LedgerResult;
use crate::idempotency::IdempotencyResolver;
use crate::policy::LimitKind;
use crate::store::LedgerUnit;

use super::transfer_handler::{load_counterpart, post_pair, PairPosting, Posted};
use super::{abort_or_recover, ensure_replay_matches, parse_amount, EngineDeps, GiftCommand, GiftResult};

/// A credit with no debited counterpart (promotional gift, voucher)
pub(crate) struct CreditPosting {
    pub account_id: Uuid,
    pub amount: Amount,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    pub payment_instructions: Option<serde_json::Value>,
    pub reference: Option<String>,
}

/// Outcome of [`post_credit`]
pub(crate) enum Credited {
    Created(Transaction),
    Duplicate(Transaction),
}

/// Lock the wallet, credit it and write one COMPLETED row.
pub(crate) async fn post_credit(deps: &EngineDeps, posting: CreditPosting) -> LedgerResult<Credited> {
    let mut unit = deps.store.begin().await?;

    let staged = stage_credit(unit.as_mut(), posting).await;
    let tx = match staged {
        Ok(tx) => tx,
        Err(e) => return Ok(Credited::Duplicate(abort_or_recover(deps, unit, e).await?)),
    };

    if let Err(e) = unit.commit().await {
        let winner = deps.idempotency.recover_duplicate(e).await?;
        return Ok(Credited::Duplicate(winner));
    }
    Ok(Credited::Created(tx))
}

async fn stage_credit(unit: &mut dyn LedgerUnit, posting: CreditPosting) -> LedgerResult<Transaction> {
    let mut account = unit.lock_account_for_update(posting.account_id).await?;
    account.credit(posting.amount)?;

    let mut tx = Transaction::new(
        account.id,
        posting.transaction_type,
        posting.amount,
        0,
        TransactionStatus::Completed,
    )
    .with_external_reference(posting.reference);
    tx.description = posting.description;
    tx.payment_instructions = posting.payment_instructions;
    tx.destination_account_id = Some(account.id);

    unit.insert_transaction(&tx).await?;
    unit.update_account(&account).await?;
    Ok(tx)
}

/// Handler for gifts
pub struct GiftHandler {
    deps: Arc<EngineDeps>,
}

impl GiftHandler {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Execute the gift command
    #[tracing::instrument(
        name = "create_gift",
        skip(self, command, context),
        fields(recipient = %command.recipient_account_id, amount = command.amount)
    )]
    pub async fn execute(
        &self,
        command: GiftCommand,
        context: &OperationContext,
    ) -> LedgerResult<GiftResult> {
        if command.sender_account_id == Some(command.recipient_account_id) {
            return Err(DomainError::SelfTransfer.into());
        }
        let amount = parse_amount(command.amount)?;

        let reference = IdempotencyResolver::normalize(command.external_reference.as_deref())?;
        if let Some(existing) = self.deps.idempotency.resolve(reference.as_deref()).await? {
            return self.replay(existing, &command).await;
        }

        let limits = &self.deps.config.policy.limits;
        limits.validate_amount(LimitKind::Gift, amount)?;

        match command.sender_account_id {
            Some(sender) => {
                limits
                    .check_daily_limit(
                        self.deps.store.as_ref(),
                        sender,
                        LimitKind::Gift,
                        amount,
                        chrono::Utc::now(),
                    )
                    .await?;

                let posting = PairPosting {
                    source_account_id: sender,
                    destination_account_id: command.recipient_account_id,
                    amount,
                    outgoing_type: TransactionType::GiftOut,
                    incoming_type: TransactionType::GiftIn,
                    description: command.description.clone(),
                    reference,
                };
                match post_pair(&self.deps, posting).await? {
                    Posted::Created(outgoing, incoming) => {
                        self.deps.record_created(&[&outgoing, &incoming], context).await;
                        tracing::info!(
                            outgoing_id = %outgoing.id,
                            incoming_id = %incoming.id,
                            "Gift completed"
                        );
                        Ok(GiftResult {
                            outgoing: Some(outgoing),
                            incoming,
                            replayed: false,
                        })
                    }
                    Posted::Duplicate(winner) => self.replay(winner, &command).await,
                }
            }
            None => {
                let posting = CreditPosting {
                    account_id: command.recipient_account_id,
                    amount,
                    transaction_type: TransactionType::GiftIn,
                    description: command.description.clone(),
                    payment_instructions: None,
                    reference,
                };
                match post_credit(&self.deps, posting).await? {
                    Credited::Created(incoming) => {
                        self.deps.record_created(&[&incoming], context).await;
                        tracing::info!(incoming_id = %incoming.id, "Promotional gift credited");
                        Ok(GiftResult {
                            outgoing: None,
                            incoming,
                            replayed: false,
                        })
                    }
                    Credited::Duplicate(winner) => self.replay(winner, &command).await,
                }
            }
        }
    }

    async fn replay(&self, existing: Transaction, command: &GiftCommand) -> LedgerResult<GiftResult> {
        match command.sender_account_id {
            Some(sender) => {
                ensure_replay_matches(&existing, &[TransactionType::GiftOut], sender)?;
                let incoming = load_counterpart(&self.deps, &existing).await?;
                Ok(GiftResult {
                    outgoing: Some(existing),
                    incoming,
                    replayed: true,
                })
            }
            None => {
                ensure_replay_matches(
                    &existing,
                    &[TransactionType::GiftIn],
                    command.recipient_account_id,
                )?;
                Ok(GiftResult {
                    outgoing: None,
                    incoming: existing,
                    replayed: true,
                })
            }
        }
    }
}
