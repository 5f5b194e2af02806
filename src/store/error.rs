//! Ledger Store Errors

use uuid::Uuid;

/// Errors that can occur in the ledger store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// Unique key on `external_reference_id` violated
    #[error("External reference already used: {0}")]
    DuplicateExternalReference(String),

    /// Row written without holding its lease
    #[error("Row {0} is not locked by this unit")]
    NotLocked(Uuid),

    /// A unit tried to persist a negative balance
    #[error("Balance invariant violated for account {0}")]
    NegativeBalance(Uuid),

    /// `related_transaction_id` points at a row that does not exist at commit
    #[error("Transaction {id} links to missing transaction {related}")]
    MissingRelatedTransaction { id: Uuid, related: Uuid },

    #[error("Invalid row data: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Infrastructure failures the caller may retry with the same reference
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }

    pub fn is_duplicate_reference(&self) -> bool {
        matches!(self, StoreError::DuplicateExternalReference(_))
    }
}
