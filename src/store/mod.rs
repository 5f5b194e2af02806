//! Ledger Store module
//!
//! Persistence contract for accounts and transaction rows. Every
//! balance-affecting change happens inside a [`LedgerUnit`]: one atomic
//! read-modify-write unit holding exclusive row leases until commit or abort.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Account, Transaction, TransactionType};

pub use error::StoreError;
pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Largest page size accepted by list queries
pub const MAX_PAGE_SIZE: u32 = 100;

/// One atomic unit of work against the store.
///
/// Dropping a unit without calling [`LedgerUnit::commit`] discards every
/// staged write and releases its leases.
#[async_trait]
pub trait LedgerUnit: Send {
    /// Acquire the exclusive lease on an account row and read it.
    async fn lock_account_for_update(&mut self, id: Uuid) -> Result<Account, StoreError>;

    /// Acquire the exclusive lease on a transaction row and read it.
    async fn lock_transaction_for_update(&mut self, id: Uuid) -> Result<Transaction, StoreError>;

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError>;

    /// Overwrite a transaction row locked or inserted by this unit.
    async fn update_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError>;

    /// Overwrite an account row locked by this unit.
    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn abort(self: Box<Self>) -> Result<(), StoreError>;
}

/// Ledger Store contract consumed by the engine
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new atomic unit
    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, StoreError>;

    /// Unlocked read of an account (soft-deleted rows included)
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;

    async fn find_transaction_by_external_ref(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Sum of `amount` over COMPLETED rows of `transaction_type` created at or after `since`
    async fn sum_completed_amount(
        &self,
        account_id: Uuid,
        transaction_type: TransactionType,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Newest first
    async fn list_transactions_by_account(
        &self,
        account_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Transaction>, StoreError>;

    /// Move every PENDING row created before `cutoff` to CANCELLED, skipping
    /// the excluded types. Returns the rows as they were committed.
    async fn expire_pending(
        &self,
        cutoff: DateTime<Utc>,
        excluded: &[TransactionType],
        reason: &str,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// WITHDRAWAL rows still PENDING or PROCESSING, last touched before `cutoff`
    async fn find_stale_withdrawals(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError>;
}

/// Lock several accounts in ascending id order.
///
/// Returns the accounts in the order the ids were given. Duplicate ids are
/// locked once.
pub async fn lock_accounts_in_order(
    unit: &mut dyn LedgerUnit,
    ids: &[Uuid],
) -> Result<Vec<Account>, StoreError> {
    let mut ordered: Vec<Uuid> = ids.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut locked = Vec::with_capacity(ordered.len());
    for id in ordered {
        locked.push(unit.lock_account_for_update(id).await?);
    }

    ids.iter()
        .map(|id| {
            locked
                .iter()
                .find(|account| account.id == *id)
                .cloned()
                .ok_or(StoreError::AccountNotFound(*id))
        })
        .collect()
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// Clamp to `page >= 1` and `1 <= per_page <= MAX_PAGE_SIZE`.
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.per_page.max(1)))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) < self.total_pages()
    }
}
