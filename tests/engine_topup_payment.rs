//! Topup, payment and settlement flows against the in-memory store

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{ctx, TestLedger};
use gsalt_ledger::audit::InMemoryAuditLog;
use gsalt_ledger::gateway::{
    BillRequest, Disbursement, DisbursementRequest, GatewayError, GatewayStatus, PayableBill,
    SettlementGateway,
};
use gsalt_ledger::handlers::{PaymentCommand, TopupCommand, TransferCommand};
use gsalt_ledger::store::InMemoryLedgerStore;
use gsalt_ledger::{
    Account, DomainError, EngineConfig, ErrorKind, LedgerError, PaymentMethod, TransactionEngine,
    TransactionStatus,
};
use uuid::Uuid;

// =========================================================================
// Topup
// =========================================================================

#[tokio::test]
async fn test_topup_credits_only_on_confirm() {
    let ledger = TestLedger::new();
    let account = ledger.account(0).await;

    let result = ledger
        .engine
        .create_topup(
            TopupCommand::new(account, 10_000, PaymentMethod::VirtualAccount),
            &ctx(),
        )
        .await
        .unwrap();

    let tx = result.transaction;
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.amount, 10_000);
    assert_eq!(tx.fee, 4_000);
    assert_eq!(tx.total_amount, 14_000);
    assert_eq!(tx.external_payment_id.as_deref(), Some(result.instructions.gateway_ref.as_str()));
    assert!(!result.replayed);
    assert_eq!(ledger.balance(account).await, 0);

    let confirmed = ledger
        .engine
        .confirm_payment(tx.id, Some("VA-PAID-1".to_string()), &ctx())
        .await
        .unwrap();

    assert_eq!(confirmed.status, TransactionStatus::Completed);
    assert!(confirmed.completed_at.is_some());
    assert_eq!(confirmed.external_payment_id.as_deref(), Some("VA-PAID-1"));
    assert_eq!(ledger.balance(account).await, 10_000);

    let history = ledger.engine.get_status_history(tx.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].change.from_status, None);
    assert_eq!(history[0].change.to_status, TransactionStatus::Pending);
    assert_eq!(history[1].change.from_status, Some(TransactionStatus::Pending));
    assert_eq!(history[1].change.to_status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_confirm_twice_is_rejected_without_double_credit() {
    let ledger = TestLedger::new();
    let account = ledger.account(0).await;
    let tx = ledger
        .engine
        .create_topup(TopupCommand::new(account, 25_000, PaymentMethod::Qris), &ctx())
        .await
        .unwrap()
        .transaction;

    ledger.engine.confirm_payment(tx.id, None, &ctx()).await.unwrap();
    let err = ledger
        .engine
        .confirm_payment(tx.id, None, &ctx())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidStatusTransition);
    assert_eq!(ledger.balance(account).await, 25_000);
}

#[tokio::test]
async fn test_topup_replay_returns_original_without_side_effects() {
    let ledger = TestLedger::new();
    let account = ledger.account(0).await;
    let command = TopupCommand::new(account, 50_000, PaymentMethod::Ewallet)
        .with_external_reference("order-7781");

    let first = ledger.engine.create_topup(command.clone(), &ctx()).await.unwrap();
    let second = ledger.engine.create_topup(command, &ctx()).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.transaction.id, second.transaction.id);
    assert_eq!(first.instructions, second.instructions);
    assert_eq!(ledger.gateway.bills(), 1);
    assert_eq!(ledger.store.transaction_count().await, 1);
}

#[tokio::test]
async fn test_reference_reused_for_another_operation_is_rejected() {
    let ledger = TestLedger::new();
    let account = ledger.account(100_000).await;
    ledger
        .engine
        .create_topup(
            TopupCommand::new(account, 10_000, PaymentMethod::Qris).with_external_reference("ref-1"),
            &ctx(),
        )
        .await
        .unwrap();

    let err = ledger
        .engine
        .create_payment(
            PaymentCommand::new(account, 5_000, PaymentMethod::WalletBalance)
                .with_external_reference("ref-1"),
            &ctx(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(ledger.balance(account).await, 100_000);
}

#[tokio::test]
async fn test_topup_gateway_failure_leaves_no_row() {
    let ledger = TestLedger::new();
    let account = ledger.account(0).await;
    ledger
        .gateway
        .fail_bills(GatewayError::Unavailable("503 from provider".to_string()));

    let err = ledger
        .engine
        .create_topup(TopupCommand::new(account, 10_000, PaymentMethod::Qris), &ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Gateway(GatewayError::Unavailable(_))));
    assert!(err.is_retryable());
    assert_eq!(ledger.store.transaction_count().await, 0);
    assert!(ledger.audit.entries().await.is_empty());
    assert_eq!(ledger.balance(account).await, 0);
}

#[tokio::test]
async fn test_topup_rejects_bad_input_before_gateway() {
    let ledger = TestLedger::new();
    let account = ledger.account(0).await;

    let err = ledger
        .engine
        .create_topup(TopupCommand::new(account, 10_000, PaymentMethod::WalletBalance), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = ledger
        .engine
        .create_topup(TopupCommand::new(account, 500, PaymentMethod::Qris), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Domain(DomainError::AmountOutOfRange { min: 1_000, .. })
    ));

    let err = ledger
        .engine
        .create_topup(TopupCommand::new(account, 0, PaymentMethod::Qris), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = ledger
        .engine
        .create_topup(TopupCommand::new(Uuid::new_v4(), 10_000, PaymentMethod::Qris), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "account_not_found");

    assert_eq!(ledger.gateway.bills(), 0);
}

/// Gateway that never answers in time
struct StalledGateway;

#[async_trait]
impl SettlementGateway for StalledGateway {
    async fn create_payable_bill(&self, _request: BillRequest) -> Result<PayableBill, GatewayError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(GatewayError::Unavailable("stalled".to_string()))
    }

    async fn create_disbursement(
        &self,
        _request: DisbursementRequest,
    ) -> Result<Disbursement, GatewayError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(GatewayError::Unavailable("stalled".to_string()))
    }

    async fn query_status(&self, _gateway_ref: &str) -> Result<GatewayStatus, GatewayError> {
        Ok(GatewayStatus::Pending)
    }
}

#[tokio::test]
async fn test_slow_gateway_times_out_and_aborts() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let account = Uuid::new_v4();
    store.seed_account(Account::open(account)).await;
    let config = EngineConfig {
        gateway_timeout: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let engine = TransactionEngine::new(
        store.clone(),
        Arc::new(StalledGateway),
        Arc::new(InMemoryAuditLog::new()),
        config,
    );

    let err = engine
        .create_topup(TopupCommand::new(account, 10_000, PaymentMethod::Qris), &ctx())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "gateway_timeout");
    assert!(err.is_retryable());
    assert_eq!(store.transaction_count().await, 0);
}

// =========================================================================
// Payment
// =========================================================================

#[tokio::test]
async fn test_wallet_payment_debits_and_completes() {
    let ledger = TestLedger::new();
    let account = ledger.account(50_000).await;

    let result = ledger
        .engine
        .create_payment(
            PaymentCommand::new(account, 20_000, PaymentMethod::WalletBalance)
                .with_description("Coffee"),
            &ctx(),
        )
        .await
        .unwrap();

    assert_eq!(result.transaction.status, TransactionStatus::Completed);
    assert_eq!(result.transaction.fee, 0);
    assert!(result.instructions.is_none());
    assert_eq!(ledger.balance(account).await, 30_000);
    assert_eq!(ledger.gateway.bills(), 0);
}

#[tokio::test]
async fn test_wallet_payment_insufficient_balance_writes_nothing() {
    let ledger = TestLedger::new();
    let account = ledger.account(1_000).await;

    let err = ledger
        .engine
        .create_payment(PaymentCommand::new(account, 5_000, PaymentMethod::WalletBalance), &ctx())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LedgerError::Domain(DomainError::InsufficientBalance {
            required: 5_000,
            available: 1_000
        })
    ));
    assert_eq!(ledger.balance(account).await, 1_000);
    assert_eq!(ledger.store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_external_payment_waits_for_confirmation() {
    let ledger = TestLedger::new();
    let account = ledger.account(0).await;

    let result = ledger
        .engine
        .create_payment(PaymentCommand::new(account, 100_000, PaymentMethod::Qris), &ctx())
        .await
        .unwrap();

    let tx = result.transaction;
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.fee, 700);
    assert_eq!(tx.total_amount, 100_700);
    assert!(result.instructions.is_some());
    assert_eq!(ledger.gateway.bills(), 1);

    let confirmed = ledger.engine.confirm_payment(tx.id, None, &ctx()).await.unwrap();
    assert_eq!(confirmed.status, TransactionStatus::Completed);
    // Collected by the merchant, the wallet is untouched.
    assert_eq!(ledger.balance(account).await, 0);
}

// =========================================================================
// Reject / retry
// =========================================================================

#[tokio::test]
async fn test_reject_then_retry_then_confirm() {
    let ledger = TestLedger::new();
    let account = ledger.account(0).await;
    let tx = ledger
        .engine
        .create_topup(TopupCommand::new(account, 10_000, PaymentMethod::CreditCard), &ctx())
        .await
        .unwrap()
        .transaction;

    let rejected = ledger
        .engine
        .reject_payment(tx.id, "card declined", &ctx())
        .await
        .unwrap();
    assert_eq!(rejected.status, TransactionStatus::Failed);
    assert_eq!(rejected.failure_reason.as_deref(), Some("card declined"));
    assert_eq!(ledger.balance(account).await, 0);

    let retried = ledger
        .engine
        .retry_transaction(tx.id, "customer retried", &ctx())
        .await
        .unwrap();
    assert_eq!(retried.status, TransactionStatus::Pending);
    assert!(retried.failure_reason.is_none());

    ledger.engine.confirm_payment(tx.id, None, &ctx()).await.unwrap();
    assert_eq!(ledger.balance(account).await, 10_000);

    let err = ledger
        .engine
        .reject_payment(tx.id, "too late", &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStatusTransition);

    let history = ledger.engine.get_status_history(tx.id).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|e| e.change.to_status).collect();
    assert_eq!(
        statuses,
        vec![
            TransactionStatus::Pending,
            TransactionStatus::Failed,
            TransactionStatus::Pending,
            TransactionStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn test_settlement_only_applies_to_collected_rows() {
    let ledger = TestLedger::new();
    let source = ledger.account(10_000).await;
    let destination = ledger.account(0).await;

    let wallet_payment = ledger
        .engine
        .create_payment(PaymentCommand::new(source, 1_000, PaymentMethod::WalletBalance), &ctx())
        .await
        .unwrap()
        .transaction;
    let err = ledger
        .engine
        .retry_transaction(wallet_payment.id, "retry", &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unsupported_operation");

    let transfer = ledger
        .engine
        .create_transfer(TransferCommand::new(source, destination, 1_000), &ctx())
        .await
        .unwrap();
    let err = ledger
        .engine
        .confirm_payment(transfer.incoming.id, None, &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unsupported_operation");

    let err = ledger
        .engine
        .confirm_payment(Uuid::new_v4(), None, &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
