//! Transaction status history
//!
//! Append-only record of every status change, chained with SHA-256 so that
//! a rewritten or removed entry is detectable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{OperationContext, TransactionStatus};

/// Hash preceding the first entry of the chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One status change. `from_status` is `None` when the row was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub from_status: Option<TransactionStatus>,
    pub to_status: TransactionStatus,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(
        transaction_id: Uuid,
        from_status: Option<TransactionStatus>,
        to_status: TransactionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            from_status,
            to_status,
            reason: None,
            metadata: serde_json::Value::Object(Default::default()),
            recorded_at: Utc::now(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Merge the operation context into the metadata
    pub fn context(mut self, context: &OperationContext) -> Self {
        self.merge_metadata(context.to_metadata());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.merge_metadata(metadata);
        self
    }

    fn merge_metadata(&mut self, extra: serde_json::Value) {
        match (&mut self.metadata, extra) {
            (serde_json::Value::Object(base), serde_json::Value::Object(extra)) => {
                base.extend(extra);
            }
            (_, serde_json::Value::Null) => {}
            (slot, extra) => *slot = extra,
        }
    }
}

/// A persisted change with its position in the hash chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub sequence_number: i64,
    #[serde(flatten)]
    pub change: StatusChange,
    pub previous_hash: String,
    pub current_hash: String,
}

impl StatusHistoryEntry {
    /// Chain `change` after an entry whose hash is `previous_hash`.
    pub fn chain(change: StatusChange, sequence_number: i64, previous_hash: &str) -> Self {
        let current_hash = entry_hash(&change, sequence_number, previous_hash);
        Self {
            sequence_number,
            change,
            previous_hash: previous_hash.to_string(),
            current_hash,
        }
    }
}

fn entry_hash(change: &StatusChange, sequence_number: i64, previous_hash: &str) -> String {
    let hash_input = format!(
        "{}{}{}{}{}{}{}{}",
        change.id,
        sequence_number,
        change.transaction_id,
        change.from_status.map(|s| s.as_str()).unwrap_or_default(),
        change.to_status.as_str(),
        change.reason.as_deref().unwrap_or_default(),
        change.metadata,
        previous_hash
    );
    sha256_hex(&hash_input)
}

/// Calculate SHA-256 hash and return as hex string
fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of hash chain verification
#[derive(Debug, Clone, PartialEq)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<Uuid>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

/// Walk entries in sequence order and recompute every link.
pub fn verify_chain(entries: &[StatusHistoryEntry]) -> ChainVerificationResult {
    let mut previous_hash = GENESIS_HASH.to_string();

    for (checked, entry) in entries.iter().enumerate() {
        if entry.previous_hash != previous_hash {
            return ChainVerificationResult {
                is_valid: false,
                entries_checked: checked as u64 + 1,
                first_invalid_entry: Some(entry.change.id),
                expected_hash: Some(previous_hash),
                actual_hash: Some(entry.previous_hash.clone()),
            };
        }

        let calculated = entry_hash(&entry.change, entry.sequence_number, &entry.previous_hash);
        if calculated != entry.current_hash {
            return ChainVerificationResult {
                is_valid: false,
                entries_checked: checked as u64 + 1,
                first_invalid_entry: Some(entry.change.id),
                expected_hash: Some(calculated),
                actual_hash: Some(entry.current_hash.clone()),
            };
        }

        previous_hash = entry.current_hash.clone();
    }

    ChainVerificationResult {
        is_valid: true,
        entries_checked: entries.len() as u64,
        first_invalid_entry: None,
        expected_hash: None,
        actual_hash: None,
    }
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid history row: {0}")]
    InvalidRow(String),
}

/// Audit Recorder contract: receives every status change of every transaction.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record_status_change(&self, change: StatusChange) -> Result<(), AuditLogError>;

    /// History of one transaction, oldest first
    async fn history(&self, transaction_id: Uuid) -> Result<Vec<StatusHistoryEntry>, AuditLogError>;
}

// =========================================================================
// Postgres recorder
// =========================================================================

/// Status history stored in `transaction_status_history`
#[derive(Debug, Clone)]
pub struct AuditLogService {
    pool: PgPool,
}

impl AuditLogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Verify the first `limit` entries of the chain (default 1000)
    pub async fn verify_hash_chain(
        &self,
        limit: Option<i64>,
    ) -> Result<ChainVerificationResult, AuditLogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sequence_number, transaction_id, from_status, to_status,
                   reason, metadata, previous_hash, current_hash, created_at
            FROM transaction_status_history
            ORDER BY sequence_number ASC
            LIMIT $1
            "#,
        )
        .bind(limit.unwrap_or(1000))
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(verify_chain(&entries))
    }
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<StatusHistoryEntry, AuditLogError> {
    let parse_status = |value: String| {
        value
            .parse::<TransactionStatus>()
            .map_err(|e| AuditLogError::InvalidRow(e.to_string()))
    };
    let from_status: Option<String> = row.try_get("from_status")?;
    let to_status: String = row.try_get("to_status")?;

    Ok(StatusHistoryEntry {
        sequence_number: row.try_get("sequence_number")?,
        change: StatusChange {
            id: row.try_get("id")?,
            transaction_id: row.try_get("transaction_id")?,
            from_status: from_status.map(parse_status).transpose()?,
            to_status: parse_status(to_status)?,
            reason: row.try_get("reason")?,
            metadata: row.try_get("metadata")?,
            recorded_at: row.try_get("created_at")?,
        },
        previous_hash: row.try_get("previous_hash")?,
        current_hash: row.try_get("current_hash")?,
    })
}

#[async_trait]
impl AuditRecorder for AuditLogService {
    async fn record_status_change(&self, change: StatusChange) -> Result<(), AuditLogError> {
        let mut tx = self.pool.begin().await?;

        // Serialize appends so each entry links to the true chain head.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('transaction_status_history'))")
            .execute(&mut *tx)
            .await?;

        let head: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT sequence_number, current_hash
            FROM transaction_status_history
            ORDER BY sequence_number DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let (sequence_number, previous_hash) = match head {
            Some((seq, hash)) => (seq + 1, hash),
            None => (1, GENESIS_HASH.to_string()),
        };
        let entry = StatusHistoryEntry::chain(change, sequence_number, &previous_hash);

        sqlx::query(
            r#"
            INSERT INTO transaction_status_history (
                id, sequence_number, transaction_id, from_status, to_status,
                reason, metadata, previous_hash, current_hash, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.change.id)
        .bind(entry.sequence_number)
        .bind(entry.change.transaction_id)
        .bind(entry.change.from_status.map(|s| s.as_str()))
        .bind(entry.change.to_status.as_str())
        .bind(&entry.change.reason)
        .bind(&entry.change.metadata)
        .bind(&entry.previous_hash)
        .bind(&entry.current_hash)
        .bind(entry.change.recorded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            transaction_id = %entry.change.transaction_id,
            to_status = %entry.change.to_status,
            sequence_number = entry.sequence_number,
            "Status change recorded"
        );

        Ok(())
    }

    async fn history(&self, transaction_id: Uuid) -> Result<Vec<StatusHistoryEntry>, AuditLogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sequence_number, transaction_id, from_status, to_status,
                   reason, metadata, previous_hash, current_hash, created_at
            FROM transaction_status_history
            WHERE transaction_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}

// =========================================================================
// In-memory recorder
// =========================================================================

/// Process-local status history, used by tests and embedders
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<Mutex<Vec<StatusHistoryEntry>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in sequence order
    pub async fn entries(&self) -> Vec<StatusHistoryEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn verify_hash_chain(&self) -> ChainVerificationResult {
        verify_chain(&self.entries.lock().await)
    }
}

#[async_trait]
impl AuditRecorder for InMemoryAuditLog {
    async fn record_status_change(&self, change: StatusChange) -> Result<(), AuditLogError> {
        let mut entries = self.entries.lock().await;
        let (sequence_number, previous_hash) = match entries.last() {
            Some(last) => (last.sequence_number + 1, last.current_hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };
        entries.push(StatusHistoryEntry::chain(change, sequence_number, &previous_hash));
        Ok(())
    }

    async fn history(&self, transaction_id: Uuid) -> Result<Vec<StatusHistoryEntry>, AuditLogError> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|entry| entry.change.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}

// =========================================================================
// Tests
// =========================================================================
