//! Transaction Processing Engine
//!
//! The operation surface consumed by an HTTP or CLI layer. Every
//! money movement is delegated to its handler; reads go straight to the store.

use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditRecorder, StatusHistoryEntry};
use crate::config::EngineConfig;
use crate::domain::{Account, DomainError, OperationContext, Transaction};
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::SettlementGateway;
use crate::handlers::{
    EngineDeps, GiftCommand, GiftHandler, GiftResult, PaymentCommand, PaymentHandler,
    PaymentResult, ReconciliationReport, SettlementHandler, TopupCommand, TopupHandler,
    TopupResult, TransferCommand, TransferHandler, TransferResult, VoucherCommand,
    VoucherHandler, VoucherResult, WithdrawalCommand, WithdrawalHandler, WithdrawalResult,
};
use crate::jobs::{self, JobError};
use crate::store::{LedgerStore, Page, PageRequest};

pub struct TransactionEngine {
    deps: Arc<EngineDeps>,
    topup: TopupHandler,
    transfer: TransferHandler,
    gift: GiftHandler,
    payment: PaymentHandler,
    withdrawal: WithdrawalHandler,
    voucher: VoucherHandler,
    settlement: SettlementHandler,
}

impl TransactionEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn SettlementGateway>,
        audit: Arc<dyn AuditRecorder>,
        config: EngineConfig,
    ) -> Self {
        let deps = Arc::new(EngineDeps::new(store, gateway, audit, config));
        Self {
            topup: TopupHandler::new(deps.clone()),
            transfer: TransferHandler::new(deps.clone()),
            gift: GiftHandler::new(deps.clone()),
            payment: PaymentHandler::new(deps.clone()),
            withdrawal: WithdrawalHandler::new(deps.clone()),
            voucher: VoucherHandler::new(deps.clone()),
            settlement: SettlementHandler::new(deps.clone()),
            deps,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.deps.config
    }

    // =========================================================================
    // Money movements
    // =========================================================================

    pub async fn create_topup(
        &self,
        command: TopupCommand,
        context: &OperationContext,
    ) -> LedgerResult<TopupResult> {
        self.topup.execute(command, context).await
    }

    pub async fn create_transfer(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> LedgerResult<TransferResult> {
        self.transfer.execute(command, context).await
    }

    pub async fn create_payment(
        &self,
        command: PaymentCommand,
        context: &OperationContext,
    ) -> LedgerResult<PaymentResult> {
        self.payment.execute(command, context).await
    }

    pub async fn create_gift(
        &self,
        command: GiftCommand,
        context: &OperationContext,
    ) -> LedgerResult<GiftResult> {
        self.gift.execute(command, context).await
    }

    /// Debit, disburse, and compensate on gateway failure.
    ///
    /// A compensated withdrawal surfaces as [`LedgerError::Gateway`] with the
    /// row left FAILED and the balance restored.
    pub async fn create_withdrawal(
        &self,
        command: WithdrawalCommand,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalResult> {
        self.withdrawal.execute(command, context).await
    }

    pub async fn redeem_voucher(
        &self,
        command: VoucherCommand,
        context: &OperationContext,
    ) -> LedgerResult<VoucherResult> {
        self.voucher.execute(command, context).await
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    pub async fn confirm_payment(
        &self,
        transaction_id: Uuid,
        external_payment_id: Option<String>,
        context: &OperationContext,
    ) -> LedgerResult<Transaction> {
        self.settlement
            .confirm(transaction_id, external_payment_id, context)
            .await
    }

    pub async fn reject_payment(
        &self,
        transaction_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<Transaction> {
        self.settlement.reject(transaction_id, reason, context).await
    }

    pub async fn retry_transaction(
        &self,
        transaction_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<Transaction> {
        self.settlement.retry(transaction_id, reason, context).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_transaction(&self, transaction_id: Uuid) -> LedgerResult<Transaction> {
        self.deps
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| DomainError::TransactionNotFound(transaction_id).into())
    }

    /// Soft-deleted accounts are reported as not found.
    pub async fn get_account(&self, account_id: Uuid) -> LedgerResult<Account> {
        match self.deps.store.find_account(account_id).await? {
            Some(account) if !account.is_deleted() => Ok(account),
            _ => Err(DomainError::AccountNotFound(account_id).into()),
        }
    }

    /// Newest first. History of soft-deleted accounts stays readable.
    pub async fn list_transactions_by_account(
        &self,
        account_id: Uuid,
        page: PageRequest,
    ) -> LedgerResult<Page<Transaction>> {
        if self.deps.store.find_account(account_id).await?.is_none() {
            return Err(DomainError::AccountNotFound(account_id).into());
        }
        Ok(self
            .deps
            .store
            .list_transactions_by_account(account_id, page)
            .await?)
    }

    pub async fn get_status_history(
        &self,
        transaction_id: Uuid,
    ) -> LedgerResult<Vec<StatusHistoryEntry>> {
        // Surface unknown ids as not found rather than an empty history.
        self.get_transaction(transaction_id).await?;
        Ok(self.deps.audit.history(transaction_id).await?)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Cancel PENDING rows older than the configured expiry horizon.
    pub async fn expire_pending_transactions(&self) -> LedgerResult<Vec<Transaction>> {
        jobs::expire_pending_transactions(
            self.deps.store.as_ref(),
            self.deps.audit.as_ref(),
            self.deps.config.pending_expiry,
        )
        .await
        .map_err(|e| match e {
            JobError::Store(e) => LedgerError::from(e),
            JobError::Ledger(e) => e,
        })
    }

    pub async fn reconcile_withdrawals(
        &self,
        older_than: chrono::Duration,
    ) -> LedgerResult<ReconciliationReport> {
        self.withdrawal
            .reconcile(older_than, &OperationContext::system("reconciliation"))
            .await
    }
}
