//! Common test utilities
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use gsalt_ledger::audit::InMemoryAuditLog;
use gsalt_ledger::gateway::{
    BillRequest, Disbursement, DisbursementRequest, GatewayError, GatewayStatus, PayableBill,
    SettlementGateway,
};
use gsalt_ledger::store::{
    InMemoryLedgerStore, LedgerStore, LedgerUnit, Page, PageRequest, StoreError,
};
use gsalt_ledger::{
    Account, Balance, EngineConfig, OperationContext, Transaction, TransactionEngine,
    TransactionType,
};

/// Scriptable settlement gateway
///
/// Bills and disbursements succeed by default; disbursements report `Pending`
/// and status queries report `Pending` until scripted otherwise.
#[derive(Default)]
pub struct MockGateway {
    bill_failure: Mutex<Option<GatewayError>>,
    disbursement_failure: Mutex<Option<GatewayError>>,
    disbursement_status: Mutex<Option<GatewayStatus>>,
    query_statuses: Mutex<HashMap<String, GatewayStatus>>,
    disbursement_keys: Mutex<Vec<String>>,
    pub bill_calls: AtomicUsize,
    pub disbursement_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl MockGateway {
    pub fn fail_bills(&self, error: GatewayError) {
        *self.bill_failure.lock().unwrap() = Some(error);
    }

    pub fn fail_disbursements(&self, error: GatewayError) {
        *self.disbursement_failure.lock().unwrap() = Some(error);
    }

    pub fn heal(&self) {
        *self.bill_failure.lock().unwrap() = None;
        *self.disbursement_failure.lock().unwrap() = None;
    }

    pub fn disburse_with(&self, status: GatewayStatus) {
        *self.disbursement_status.lock().unwrap() = Some(status);
    }

    pub fn settle(&self, gateway_ref: &str, status: GatewayStatus) {
        self.query_statuses
            .lock()
            .unwrap()
            .insert(gateway_ref.to_string(), status);
    }

    pub fn disbursement_keys(&self) -> Vec<String> {
        self.disbursement_keys.lock().unwrap().clone()
    }

    pub fn bills(&self) -> usize {
        self.bill_calls.load(Ordering::SeqCst)
    }

    pub fn disbursements(&self) -> usize {
        self.disbursement_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementGateway for MockGateway {
    async fn create_payable_bill(&self, request: BillRequest) -> Result<PayableBill, GatewayError> {
        self.bill_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.bill_failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(PayableBill {
            gateway_ref: format!("bill-{}", request.transaction_id),
            payment_instructions: serde_json::json!({
                "method": request.method.as_str(),
                "amount": request.amount,
                "virtual_account_number": "8808123456789",
            }),
            expires_at: Utc::now() + chrono::Duration::hours(24),
        })
    }

    async fn create_disbursement(
        &self,
        request: DisbursementRequest,
    ) -> Result<Disbursement, GatewayError> {
        self.disbursement_calls.fetch_add(1, Ordering::SeqCst);
        self.disbursement_keys
            .lock()
            .unwrap()
            .push(request.idempotency_key.clone());
        if let Some(error) = self.disbursement_failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(Disbursement {
            gateway_ref: format!("disb-{}", request.idempotency_key),
            status: self
                .disbursement_status
                .lock()
                .unwrap()
                .unwrap_or(GatewayStatus::Pending),
        })
    }

    async fn query_status(&self, gateway_ref: &str) -> Result<GatewayStatus, GatewayError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .query_statuses
            .lock()
            .unwrap()
            .get(gateway_ref)
            .copied()
            .unwrap_or(GatewayStatus::Pending))
    }
}

/// Store wrapper that can hide one committed reference from the next lookup,
/// as if a concurrent request committed between the lookup and the insert.
pub struct RacingStore {
    inner: Arc<dyn LedgerStore>,
    hide_next_lookup: AtomicBool,
}

impl RacingStore {
    pub fn new(inner: Arc<dyn LedgerStore>) -> Self {
        Self {
            inner,
            hide_next_lookup: AtomicBool::new(false),
        }
    }

    pub fn hide_next_lookup(&self) {
        self.hide_next_lookup.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for RacingStore {
    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, StoreError> {
        self.inner.begin().await
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        self.inner.find_account(id).await
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        self.inner.find_transaction(id).await
    }

    async fn find_transaction_by_external_ref(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        if self.hide_next_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_transaction_by_external_ref(reference).await
    }

    async fn sum_completed_amount(
        &self,
        account_id: Uuid,
        transaction_type: TransactionType,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.inner
            .sum_completed_amount(account_id, transaction_type, since)
            .await
    }

    async fn list_transactions_by_account(
        &self,
        account_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Transaction>, StoreError> {
        self.inner.list_transactions_by_account(account_id, page).await
    }

    async fn expire_pending(
        &self,
        cutoff: DateTime<Utc>,
        excluded: &[TransactionType],
        reason: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.inner.expire_pending(cutoff, excluded, reason).await
    }

    async fn find_stale_withdrawals(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.inner.find_stale_withdrawals(cutoff).await
    }
}

/// Engine wired to in-memory collaborators
pub struct TestLedger {
    pub store: Arc<InMemoryLedgerStore>,
    pub audit: Arc<InMemoryAuditLog>,
    pub gateway: Arc<MockGateway>,
    pub engine: Arc<TransactionEngine>,
}

impl TestLedger {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let gateway = Arc::new(MockGateway::default());
        let engine = Arc::new(TransactionEngine::new(
            store.clone(),
            gateway.clone(),
            audit.clone(),
            config,
        ));
        Self {
            store,
            audit,
            gateway,
            engine,
        }
    }

    /// Same wiring, with the engine reading through a [`RacingStore`]
    pub fn racing() -> (Self, Arc<RacingStore>) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let racing = Arc::new(RacingStore::new(store.clone()));
        let audit = Arc::new(InMemoryAuditLog::new());
        let gateway = Arc::new(MockGateway::default());
        let engine = Arc::new(TransactionEngine::new(
            racing.clone(),
            gateway.clone(),
            audit.clone(),
            EngineConfig::default(),
        ));
        let ledger = Self {
            store,
            audit,
            gateway,
            engine,
        };
        (ledger, racing)
    }

    /// Seed an account holding `balance` units
    pub async fn account(&self, balance: i64) -> Uuid {
        let id = Uuid::new_v4();
        let account = Account::open(id).with_balance(Balance::new(balance).unwrap());
        self.store.seed_account(account).await;
        id
    }

    pub async fn balance(&self, account_id: Uuid) -> i64 {
        self.store
            .find_account(account_id)
            .await
            .unwrap()
            .expect("account exists")
            .balance
            .units()
    }

    pub async fn transactions(&self, account_id: Uuid) -> Vec<Transaction> {
        self.store
            .list_transactions_by_account(account_id, PageRequest::new(1, 100))
            .await
            .unwrap()
            .items
    }
}

pub fn ctx() -> OperationContext {
    OperationContext::new().with_actor("test-suite")
}

/// Connect to `DATABASE_URL` and empty the ledger tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // History is append-only: TRUNCATE bypasses the row trigger.
    sqlx::query("TRUNCATE TABLE transaction_status_history, transactions, accounts CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}

/// Insert an account row directly
pub async fn seed_pg_account(pool: &PgPool, balance: i64) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO accounts (id, balance) VALUES ($1, $2)")
        .bind(id)
        .bind(balance)
        .execute(pool)
        .await
        .expect("Failed to seed account");
    id
}
