//! In-memory ledger store
//!
//! Row leases are per-id async mutexes; a unit stages its writes and applies
//! them under the state write lock at commit, so readers never observe a
//! half-applied unit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::domain::{Account, Transaction, TransactionStatus, TransactionType};

use super::{LedgerStore, LedgerUnit, Page, PageRequest, StoreError};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    transactions: HashMap<Uuid, Transaction>,
    references: HashMap<String, Uuid>,
}

/// Per-row lease mutexes. An entry lives only while some unit holds or
/// waits on it.
type LeaseTable = Arc<std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// Thread-safe in-memory store for accounts and transactions.
///
/// Cloning shares the underlying state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<State>>,
    leases: LeaseTable,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account row directly, outside any unit.
    pub async fn seed_account(&self, account: Account) {
        let mut state = self.state.write().await;
        state.accounts.insert(account.id, account);
    }

    /// Soft-delete an account row.
    pub async fn soft_delete_account(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        account.deleted_at = Some(Utc::now());
        Ok(())
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }
}

fn lock_table(leases: &LeaseTable) -> MutexGuard<'_, HashMap<Uuid, Arc<Mutex<()>>>> {
    leases.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive hold on one row; dropping it releases the row.
struct RowLease {
    id: Uuid,
    table: LeaseTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowLease {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        drop(self.guard.take());
        // Waiters clone the entry under the table lock, so a count of one
        // means nobody else holds or awaits this row.
        if table
            .get(&self.id)
            .is_some_and(|lease| Arc::strong_count(lease) == 1)
        {
            table.remove(&self.id);
        }
    }
}

async fn acquire_lease(leases: &LeaseTable, id: Uuid) -> RowLease {
    let lease = lock_table(leases).entry(id).or_default().clone();
    let guard = lease.lock_owned().await;
    RowLease {
        id,
        table: leases.clone(),
        guard: Some(guard),
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, StoreError> {
        Ok(Box::new(InMemoryUnit {
            state: self.state.clone(),
            leases: self.leases.clone(),
            held: HashMap::new(),
            accounts: HashMap::new(),
            transactions: HashMap::new(),
            inserted: HashSet::new(),
        }))
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        Ok(self.state.read().await.transactions.get(&id).cloned())
    }

    async fn find_transaction_by_external_ref(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .references
            .get(reference)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn sum_completed_amount(
        &self,
        account_id: Uuid,
        transaction_type: TransactionType,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| {
                tx.account_id == account_id
                    && tx.transaction_type == transaction_type
                    && tx.status == TransactionStatus::Completed
                    && tx.created_at >= since
            })
            .map(|tx| tx.amount)
            .sum())
    }

    async fn list_transactions_by_account(
        &self,
        account_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Transaction>, StoreError> {
        let state = self.state.read().await;
        let mut rows: Vec<&Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.account_id == account_id)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = rows.len() as u64;
        let items = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total,
        })
    }

    async fn expire_pending(
        &self,
        cutoff: DateTime<Utc>,
        excluded: &[TransactionType],
        reason: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        let candidates: Vec<Uuid> = {
            let state = self.state.read().await;
            state
                .transactions
                .values()
                .filter(|tx| {
                    tx.status == TransactionStatus::Pending
                        && tx.created_at < cutoff
                        && !excluded.contains(&tx.transaction_type)
                })
                .map(|tx| tx.id)
                .collect()
        };

        let mut cancelled = Vec::new();
        for id in candidates {
            let _lease = acquire_lease(&self.leases, id).await;
            let mut state = self.state.write().await;
            let Some(tx) = state.transactions.get_mut(&id) else {
                continue;
            };
            // Re-check under the lease: another unit may have settled it.
            if tx.status != TransactionStatus::Pending {
                continue;
            }
            tx.transition_to(TransactionStatus::Cancelled)
                .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
            tx.failure_reason = Some(reason.to_string());
            cancelled.push(tx.clone());
        }

        Ok(cancelled)
    }

    async fn find_stale_withdrawals(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.transaction_type == TransactionType::Withdrawal
                    && matches!(
                        tx.status,
                        TransactionStatus::Pending | TransactionStatus::Processing
                    )
                    && tx.updated_at < cutoff
            })
            .cloned()
            .collect();
        rows.sort_by_key(|tx| tx.created_at);
        Ok(rows)
    }
}

/// Staged unit of work against [`InMemoryLedgerStore`]
struct InMemoryUnit {
    state: Arc<RwLock<State>>,
    leases: LeaseTable,
    held: HashMap<Uuid, RowLease>,
    accounts: HashMap<Uuid, Account>,
    transactions: HashMap<Uuid, Transaction>,
    inserted: HashSet<Uuid>,
}

impl InMemoryUnit {
    async fn lease(&mut self, id: Uuid) {
        if !self.held.contains_key(&id) {
            let guard = acquire_lease(&self.leases, id).await;
            self.held.insert(id, guard);
        }
    }
}

#[async_trait]
impl LedgerUnit for InMemoryUnit {
    async fn lock_account_for_update(&mut self, id: Uuid) -> Result<Account, StoreError> {
        if let Some(staged) = self.accounts.get(&id) {
            return Ok(staged.clone());
        }

        self.lease(id).await;
        let state = self.state.read().await;
        match state.accounts.get(&id) {
            Some(account) if !account.is_deleted() => Ok(account.clone()),
            _ => Err(StoreError::AccountNotFound(id)),
        }
    }

    async fn lock_transaction_for_update(&mut self, id: Uuid) -> Result<Transaction, StoreError> {
        if let Some(staged) = self.transactions.get(&id) {
            return Ok(staged.clone());
        }

        self.lease(id).await;
        let state = self.state.read().await;
        state
            .transactions
            .get(&id)
            .cloned()
            .ok_or(StoreError::TransactionNotFound(id))
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        if self.transactions.contains_key(&tx.id)
            || self.state.read().await.transactions.contains_key(&tx.id)
        {
            return Err(StoreError::InvalidRow(format!(
                "transaction {} already exists",
                tx.id
            )));
        }
        // A reference committed by another unit fails here, as a unique index would.
        if let Some(reference) = &tx.external_reference_id {
            if self.state.read().await.references.contains_key(reference) {
                return Err(StoreError::DuplicateExternalReference(reference.clone()));
            }
        }
        self.inserted.insert(tx.id);
        self.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn update_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        if !self.inserted.contains(&tx.id) && !self.held.contains_key(&tx.id) {
            return Err(StoreError::NotLocked(tx.id));
        }
        self.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        if !self.held.contains_key(&account.id) {
            return Err(StoreError::NotLocked(account.id));
        }
        if account.balance.units() < 0 {
            return Err(StoreError::NegativeBalance(account.id));
        }
        self.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let unit = *self;
        let mut state = unit.state.write().await;

        // Unique key on external_reference_id, checked before anything is applied.
        let mut claimed = HashSet::new();
        for tx in unit.transactions.values() {
            if let Some(reference) = &tx.external_reference_id {
                let owner = state.references.get(reference);
                if owner.is_some_and(|owner| *owner != tx.id) || !claimed.insert(reference.clone()) {
                    return Err(StoreError::DuplicateExternalReference(reference.clone()));
                }
            }
            if let Some(related) = tx.related_transaction_id {
                if !unit.transactions.contains_key(&related)
                    && !state.transactions.contains_key(&related)
                {
                    return Err(StoreError::MissingRelatedTransaction { id: tx.id, related });
                }
            }
        }

        for (id, account) in unit.accounts {
            state.accounts.insert(id, account);
        }
        for (id, tx) in unit.transactions {
            if let Some(reference) = &tx.external_reference_id {
                state.references.insert(reference.clone(), id);
            }
            state.transactions.insert(id, tx);
        }

        // Leases in `unit.held` are released when the unit drops here.
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
