//! Transfer Handler
//!
//! Moves funds between two wallets as a linked TRANSFER_OUT / TRANSFER_IN
//! pair, both COMPLETED in one unit.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    link_pair, Amount, DomainError, OperationContext, Transaction, TransactionStatus,
    TransactionType,
};
use crate::error::{LedgerError, LedgerResult};
use crate::idempotency::IdempotencyResolver;
use crate::policy::LimitKind;
use crate::store::{lock_accounts_in_order, LedgerUnit};

use super::{
    abort_or_recover, ensure_replay_matches, parse_amount, EngineDeps, TransferCommand, TransferResult,
};

/// A debit on one wallet mirrored by a credit on another
pub(crate) struct PairPosting {
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount: Amount,
    pub outgoing_type: TransactionType,
    pub incoming_type: TransactionType,
    pub description: Option<String>,
    pub reference: Option<String>,
}

/// Outcome of [`post_pair`]
pub(crate) enum Posted {
    Created(Transaction, Transaction),
    /// Lost the unique-key race to a concurrent request with the same reference
    Duplicate(Transaction),
}

/// Lock both wallets in id order, debit the source, credit the destination
/// and write both linked legs in a single unit.
pub(crate) async fn post_pair(deps: &EngineDeps, posting: PairPosting) -> LedgerResult<Posted> {
    let mut unit = deps.store.begin().await?;

    let staged = stage_pair(unit.as_mut(), &posting).await;
    let (outgoing, incoming) = match staged {
        Ok(legs) => legs,
        Err(e) => return Ok(Posted::Duplicate(abort_or_recover(deps, unit, e).await?)),
    };

    if let Err(e) = unit.commit().await {
        let winner = deps.idempotency.recover_duplicate(e).await?;
        return Ok(Posted::Duplicate(winner));
    }

    Ok(Posted::Created(outgoing, incoming))
}

async fn stage_pair(
    unit: &mut dyn LedgerUnit,
    posting: &PairPosting,
) -> LedgerResult<(Transaction, Transaction)> {
    let accounts = lock_accounts_in_order(
        unit,
        &[posting.source_account_id, posting.destination_account_id],
    )
    .await?;
    let (mut source, mut destination) = match accounts.as_slice() {
        [source, destination] => (source.clone(), destination.clone()),
        _ => return Err(LedgerError::internal("expected exactly two locked accounts")),
    };

    // Balance is read under the lease; no earlier read feeds this check.
    source.debit(posting.amount)?;
    destination.credit(posting.amount)?;

    let counterparties = (
        Some(posting.source_account_id),
        Some(posting.destination_account_id),
    );
    let mut outgoing = Transaction::new(
        source.id,
        posting.outgoing_type,
        posting.amount,
        0,
        TransactionStatus::Completed,
    )
    .with_counterparties(counterparties.0, counterparties.1)
    .with_external_reference(posting.reference.clone());
    let mut incoming = Transaction::new(
        destination.id,
        posting.incoming_type,
        posting.amount,
        0,
        TransactionStatus::Completed,
    )
    .with_counterparties(counterparties.0, counterparties.1);
    outgoing.description = posting.description.clone();
    incoming.description = posting.description.clone();
    link_pair(&mut outgoing, &mut incoming);

    unit.insert_transaction(&outgoing).await?;
    unit.insert_transaction(&incoming).await?;
    unit.update_account(&source).await?;
    unit.update_account(&destination).await?;

    Ok((outgoing, incoming))
}

/// Load the counterpart leg of a replayed pair.
pub(crate) async fn load_counterpart(
    deps: &EngineDeps,
    leg: &Transaction,
) -> LedgerResult<Transaction> {
    let related = leg.related_transaction_id.ok_or_else(|| {
        LedgerError::internal(format!("transaction {} has no linked leg", leg.id))
    })?;
    deps.store
        .find_transaction(related)
        .await?
        .ok_or_else(|| DomainError::TransactionNotFound(related).into())
}

/// Handler for wallet-to-wallet transfers
pub struct TransferHandler {
    deps: Arc<EngineDeps>,
}

impl TransferHandler {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Execute the transfer command
    #[tracing::instrument(
        name = "create_transfer",
        skip(self, command, context),
        fields(
            source = %command.source_account_id,
            destination = %command.destination_account_id,
            amount = command.amount
        )
    )]
    pub async fn execute(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> LedgerResult<TransferResult> {
        if command.source_account_id == command.destination_account_id {
            return Err(DomainError::SelfTransfer.into());
        }
        let amount = parse_amount(command.amount)?;

        let reference = IdempotencyResolver::normalize(command.external_reference.as_deref())?;
        if let Some(existing) = self.deps.idempotency.resolve(reference.as_deref()).await? {
            return self.replay(existing, command.source_account_id).await;
        }

        let limits = &self.deps.config.policy.limits;
        limits.validate_amount(LimitKind::Transfer, amount)?;
        limits
            .check_daily_limit(
                self.deps.store.as_ref(),
                command.source_account_id,
                LimitKind::Transfer,
                amount,
                chrono::Utc::now(),
            )
            .await?;

        let posting = PairPosting {
            source_account_id: command.source_account_id,
            destination_account_id: command.destination_account_id,
            amount,
            outgoing_type: TransactionType::TransferOut,
            incoming_type: TransactionType::TransferIn,
            description: command.description,
            reference,
        };

        match post_pair(&self.deps, posting).await? {
            Posted::Created(outgoing, incoming) => {
                self.deps.record_created(&[&outgoing, &incoming], context).await;
                tracing::info!(
                    outgoing_id = %outgoing.id,
                    incoming_id = %incoming.id,
                    "Transfer completed"
                );
                Ok(TransferResult {
                    outgoing,
                    incoming,
                    replayed: false,
                })
            }
            Posted::Duplicate(winner) => self.replay(winner, command.source_account_id).await,
        }
    }

    async fn replay(&self, existing: Transaction, source: Uuid) -> LedgerResult<TransferResult> {
        ensure_replay_matches(&existing, &[TransactionType::TransferOut], source)?;
        let incoming = load_counterpart(&self.deps, &existing).await?;
        Ok(TransferResult {
            outgoing: existing,
            incoming,
            replayed: true,
        })
    }
}
