//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;
use uuid::Uuid;

use super::{TransactionStatus, TransactionType};

/// Business rule violations and domain invariant failures.
///
/// These are independent of the store and gateway layers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Bad input shape
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Amount outside the configured bounds for the operation
    #[error("Amount {amount} is outside the allowed range [{min}, {max}] for {operation}")]
    AmountOutOfRange {
        operation: &'static str,
        amount: i64,
        min: i64,
        max: i64,
    },

    /// Insufficient balance for debit operation
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    /// Daily aggregate cap would be exceeded
    #[error("Daily limit exceeded for {operation}: used {used}, requested {requested}, cap {cap}")]
    DailyLimitExceeded {
        operation: &'static str,
        used: i64,
        requested: i64,
        cap: i64,
    },

    /// Transfer or gift to the same account
    #[error("Cannot move funds from an account to itself")]
    SelfTransfer,

    /// Status change not allowed by the state machine
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Operation is not defined for this transaction type
    #[error("Operation '{operation}' is not supported for {transaction_type} transactions")]
    UnsupportedOperation {
        operation: &'static str,
        transaction_type: TransactionType,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: i64, available: i64) -> Self {
        Self::InsufficientBalance {
            required,
            available,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::AccountNotFound(_) | Self::TransactionNotFound(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound(_) | Self::TransactionNotFound(_)
        )
    }
}
