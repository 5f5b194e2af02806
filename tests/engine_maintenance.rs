//! Pending expiry, the scheduler, and the status history trail

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{ctx, MockGateway, TestLedger};
use gsalt_ledger::audit::{AuditLogError, AuditRecorder, StatusChange, StatusHistoryEntry};
use gsalt_ledger::handlers::{PaymentCommand, TopupCommand, TransferCommand, WithdrawalCommand};
use gsalt_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use gsalt_ledger::store::{InMemoryLedgerStore, LedgerStore, LedgerUnit};
use gsalt_ledger::{
    Account, Amount, Balance, BankDetails, EngineConfig, PaymentMethod, Transaction,
    TransactionEngine, TransactionStatus, TransactionType,
};
use uuid::Uuid;

async fn seed_row(
    store: &InMemoryLedgerStore,
    account_id: Uuid,
    transaction_type: TransactionType,
    status: TransactionStatus,
    age: chrono::Duration,
) -> Transaction {
    let mut tx = Transaction::new(
        account_id,
        transaction_type,
        Amount::new(10_000).unwrap(),
        0,
        status,
    );
    tx.created_at = Utc::now() - age;
    tx.updated_at = tx.created_at;
    let mut unit = store.begin().await.unwrap();
    unit.insert_transaction(&tx).await.unwrap();
    unit.commit().await.unwrap();
    tx
}

#[tokio::test]
async fn test_expiry_cancels_only_stale_pending_rows() {
    let ledger = TestLedger::new();
    let account = ledger.account(0).await;
    let day = chrono::Duration::hours(25);

    let stale_topup = seed_row(
        &ledger.store,
        account,
        TransactionType::Topup,
        TransactionStatus::Pending,
        day,
    )
    .await;
    let stale_payment = seed_row(
        &ledger.store,
        account,
        TransactionType::Payment,
        TransactionStatus::Pending,
        day,
    )
    .await;
    let fresh_topup = seed_row(
        &ledger.store,
        account,
        TransactionType::Topup,
        TransactionStatus::Pending,
        chrono::Duration::hours(1),
    )
    .await;
    let old_withdrawal = seed_row(
        &ledger.store,
        account,
        TransactionType::Withdrawal,
        TransactionStatus::Pending,
        day,
    )
    .await;
    let old_completed = seed_row(
        &ledger.store,
        account,
        TransactionType::Topup,
        TransactionStatus::Completed,
        day,
    )
    .await;

    let cancelled = ledger.engine.expire_pending_transactions().await.unwrap();
    let mut ids: Vec<Uuid> = cancelled.iter().map(|tx| tx.id).collect();
    ids.sort();
    let mut expected = vec![stale_topup.id, stale_payment.id];
    expected.sort();
    assert_eq!(ids, expected);

    for (id, status) in [
        (stale_topup.id, TransactionStatus::Cancelled),
        (stale_payment.id, TransactionStatus::Cancelled),
        (fresh_topup.id, TransactionStatus::Pending),
        (old_withdrawal.id, TransactionStatus::Pending),
        (old_completed.id, TransactionStatus::Completed),
    ] {
        assert_eq!(ledger.engine.get_transaction(id).await.unwrap().status, status);
    }

    let history = ledger.engine.get_status_history(stale_topup.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].change.from_status, Some(TransactionStatus::Pending));
    assert_eq!(history[0].change.to_status, TransactionStatus::Cancelled);

    // Idempotent: nothing left to cancel.
    assert!(ledger.engine.expire_pending_transactions().await.unwrap().is_empty());
    assert_eq!(ledger.audit.entries().await.len(), 2);
}

#[tokio::test]
async fn test_expired_topup_cannot_be_confirmed() {
    let ledger = TestLedger::new();
    let account = ledger.account(0).await;
    let stale = seed_row(
        &ledger.store,
        account,
        TransactionType::Topup,
        TransactionStatus::Pending,
        chrono::Duration::hours(30),
    )
    .await;

    ledger.engine.expire_pending_transactions().await.unwrap();

    let err = ledger
        .engine
        .confirm_payment(stale.id, None, &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_status_transition");
    assert_eq!(ledger.balance(account).await, 0);
}

#[tokio::test]
async fn test_scheduler_runs_expiry_and_reconciliation() {
    let ledger = TestLedger::new();
    let account = ledger.account(10_000).await;
    seed_row(
        &ledger.store,
        account,
        TransactionType::Topup,
        TransactionStatus::Pending,
        chrono::Duration::hours(48),
    )
    .await;
    ledger
        .engine
        .create_withdrawal(
            WithdrawalCommand::new(account, 1_000, BankDetails::new("BNI", "987654321", "Budi")),
            &ctx(),
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let config = JobSchedulerConfig {
        reconcile_after: chrono::Duration::zero(),
        ..JobSchedulerConfig::default()
    };
    let scheduler = JobScheduler::with_config(ledger.store.clone(), ledger.audit.clone(), config)
        .with_reconciliation(ledger.engine.clone());

    let report = scheduler.run_all_once().await;
    assert_eq!(report.transactions_expired, 1);
    assert!(report.errors.is_empty());
    let reconciliation = report.reconciliation.expect("engine attached");
    assert_eq!(reconciliation.examined, 1);
    assert_eq!(reconciliation.still_pending, 1);
}

// =========================================================================
// Status history
// =========================================================================

#[tokio::test]
async fn test_history_forms_a_valid_hash_chain() {
    let ledger = TestLedger::new();
    let a = ledger.account(50_000).await;
    let b = ledger.account(0).await;

    let topup = ledger
        .engine
        .create_topup(TopupCommand::new(a, 10_000, PaymentMethod::RetailOutlet), &ctx())
        .await
        .unwrap()
        .transaction;
    ledger.engine.confirm_payment(topup.id, None, &ctx()).await.unwrap();
    ledger
        .engine
        .create_transfer(TransferCommand::new(a, b, 7_500), &ctx())
        .await
        .unwrap();
    ledger
        .engine
        .create_payment(PaymentCommand::new(b, 2_000, PaymentMethod::WalletBalance), &ctx())
        .await
        .unwrap();

    let entries = ledger.audit.entries().await;
    assert_eq!(entries.len(), 5);
    let sequence: Vec<i64> = entries.iter().map(|e| e.sequence_number).collect();
    assert_eq!(sequence, vec![1, 2, 3, 4, 5]);
    assert!(entries
        .iter()
        .all(|e| e.change.metadata["actor"] == "test-suite"));

    let result = ledger.audit.verify_hash_chain().await;
    assert!(result.is_valid);
    assert_eq!(result.entries_checked, 5);
}

/// Recorder that is always down
struct BrokenRecorder;

#[async_trait]
impl AuditRecorder for BrokenRecorder {
    async fn record_status_change(&self, _change: StatusChange) -> Result<(), AuditLogError> {
        Err(AuditLogError::InvalidRow("recorder offline".to_string()))
    }

    async fn history(&self, _transaction_id: Uuid) -> Result<Vec<StatusHistoryEntry>, AuditLogError> {
        Err(AuditLogError::InvalidRow("recorder offline".to_string()))
    }
}

#[tokio::test]
async fn test_recorder_failure_does_not_undo_committed_work() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    store
        .seed_account(Account::open(a).with_balance(Balance::new(5_000).unwrap()))
        .await;
    store.seed_account(Account::open(b)).await;
    let engine = TransactionEngine::new(
        store.clone(),
        Arc::new(MockGateway::default()),
        Arc::new(BrokenRecorder),
        EngineConfig::default(),
    );

    engine
        .create_transfer(TransferCommand::new(a, b, 1_000), &ctx())
        .await
        .unwrap();

    assert_eq!(store.find_account(b).await.unwrap().unwrap().balance.units(), 1_000);
}
