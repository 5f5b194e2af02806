//! PostgreSQL ledger store
//!
//! Row leases are `SELECT ... FOR UPDATE` locks held by the enclosing
//! database transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use crate::domain::{Account, Balance, Transaction, TransactionType};

use super::{LedgerStore, LedgerUnit, Page, PageRequest, StoreError};

const TRANSACTION_COLUMNS: &str = r#"
    id, account_id, type, amount, fee, total_amount, status, description,
    payment_method, payment_instructions, external_reference_id, external_payment_id,
    related_transaction_id, source_account_id, destination_account_id, failure_reason,
    created_at, updated_at, completed_at
"#;

const ACCOUNT_COLUMNS: &str = "id, balance, points, created_at, updated_at, deleted_at";

/// Postgres-backed [`LedgerStore`]
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let balance: i64 = row.try_get("balance")?;
    Ok(Account {
        id: row.try_get("id")?,
        balance: Balance::new(balance).map_err(|e| StoreError::InvalidRow(e.to_string()))?,
        points: row.try_get("points")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let transaction_type: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    let payment_method: Option<String> = row.try_get("payment_method")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        transaction_type: transaction_type
            .parse()
            .map_err(|e: crate::domain::DomainError| StoreError::InvalidRow(e.to_string()))?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        total_amount: row.try_get("total_amount")?,
        status: status
            .parse()
            .map_err(|e: crate::domain::DomainError| StoreError::InvalidRow(e.to_string()))?,
        description: row.try_get("description")?,
        payment_method: payment_method
            .map(|m| m.parse())
            .transpose()
            .map_err(|e: crate::domain::DomainError| StoreError::InvalidRow(e.to_string()))?,
        payment_instructions: row.try_get("payment_instructions")?,
        external_reference_id: row.try_get("external_reference_id")?,
        external_payment_id: row.try_get("external_payment_id")?,
        related_transaction_id: row.try_get("related_transaction_id")?,
        source_account_id: row.try_get("source_account_id")?,
        destination_account_id: row.try_get("destination_account_id")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Translate the unique violation on `external_reference_id`.
fn map_insert_error(err: sqlx::Error, tx: &Transaction) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let is_reference = db_err
            .constraint()
            .is_some_and(|name| name.contains("external_reference"));
        if db_err.code().as_deref() == Some("23505") && is_reference {
            return StoreError::DuplicateExternalReference(
                tx.external_reference_id.clone().unwrap_or_default(),
            );
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerUnit { tx }))
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn find_transaction_by_external_ref(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE external_reference_id = $1",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn sum_completed_amount(
        &self,
        account_id: Uuid,
        transaction_type: TransactionType,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM transactions
            WHERE account_id = $1
              AND type = $2
              AND status = 'COMPLETED'
              AND created_at >= $3
            "#,
        )
        .bind(account_id)
        .bind(transaction_type.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn list_transactions_by_account(
        &self,
        account_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Transaction>, StoreError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE account_id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;

        let sql = format!(
            r#"
            SELECT {} FROM transactions
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows
                .iter()
                .map(transaction_from_row)
                .collect::<Result<_, _>>()?,
            page: page.page,
            per_page: page.per_page,
            total: total.max(0) as u64,
        })
    }

    async fn expire_pending(
        &self,
        cutoff: DateTime<Utc>,
        excluded: &[TransactionType],
        reason: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        let excluded: Vec<String> = excluded.iter().map(|t| t.as_str().to_string()).collect();
        // Rows already moved out of PENDING by a concurrent unit fail the predicate
        // once their lock is released, so repeated sweeps are harmless.
        let sql = format!(
            r#"
            UPDATE transactions
            SET status = 'CANCELLED', failure_reason = $3, updated_at = NOW()
            WHERE status = 'PENDING'
              AND created_at < $1
              AND NOT (type = ANY($2))
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(&excluded)
            .bind(reason)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn find_stale_withdrawals(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM transactions
            WHERE type = 'WITHDRAWAL'
              AND status IN ('PENDING', 'PROCESSING')
              AND updated_at < $1
            ORDER BY created_at ASC
            "#,
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transaction_from_row).collect()
    }
}

/// A database transaction acting as one atomic unit
struct PgLedgerUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerUnit for PgLedgerUnit {
    async fn lock_account_for_update(&mut self, id: Uuid) -> Result<Account, StoreError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::AccountNotFound(id))?;
        account_from_row(&row)
    }

    async fn lock_transaction_for_update(&mut self, id: Uuid) -> Result<Transaction, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::TransactionNotFound(id))?;
        transaction_from_row(&row)
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, account_id, type, amount, fee, total_amount, status, description,
                payment_method, payment_instructions, external_reference_id, external_payment_id,
                related_transaction_id, source_account_id, destination_account_id, failure_reason,
                created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(tx.id)
        .bind(tx.account_id)
        .bind(tx.transaction_type.as_str())
        .bind(tx.amount)
        .bind(tx.fee)
        .bind(tx.total_amount)
        .bind(tx.status.as_str())
        .bind(&tx.description)
        .bind(tx.payment_method.map(|m| m.as_str()))
        .bind(&tx.payment_instructions)
        .bind(&tx.external_reference_id)
        .bind(&tx.external_payment_id)
        .bind(tx.related_transaction_id)
        .bind(tx.source_account_id)
        .bind(tx.destination_account_id)
        .bind(&tx.failure_reason)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.completed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_insert_error(e, tx))?;

        Ok(())
    }

    async fn update_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2,
                payment_instructions = $3,
                external_payment_id = $4,
                related_transaction_id = $5,
                failure_reason = $6,
                updated_at = $7,
                completed_at = $8
            WHERE id = $1
            "#,
        )
        .bind(tx.id)
        .bind(tx.status.as_str())
        .bind(&tx.payment_instructions)
        .bind(&tx.external_payment_id)
        .bind(tx.related_transaction_id)
        .bind(&tx.failure_reason)
        .bind(tx.updated_at)
        .bind(tx.completed_at)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::TransactionNotFound(tx.id));
        }
        Ok(())
    }

    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        if account.balance.units() < 0 {
            return Err(StoreError::NegativeBalance(account.id));
        }

        let rows = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, points = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(account.balance.units())
        .bind(account.points)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::AccountNotFound(account.id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let unit = *self;
        unit.tx.commit().await.map_err(|e| {
            tracing::error!(error = %e, "Ledger unit commit failed");
            StoreError::Database(e)
        })
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        let unit = *self;
        unit.tx.rollback().await?;
        Ok(())
    }
}
