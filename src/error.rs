//! Error handling module
//!
//! Centralized error type returned by every engine operation.

use crate::audit::AuditLogError;
use crate::config::ConfigError;
use crate::domain::DomainError;
use crate::gateway::GatewayError;
use crate::policy::DailyLimitError;
use crate::store::StoreError;

/// Ledger-wide Result type
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger error types
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    // Business rule failures, surfaced as-is
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Settlement provider failures
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    // Store / infra failures
    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditLogError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Coarse classification of a [`LedgerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InsufficientBalance,
    DailyLimitExceeded,
    SelfTransfer,
    InvalidStatusTransition,
    NotFound,
    Gateway,
    Internal,
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => DomainError::AccountNotFound(id).into(),
            StoreError::TransactionNotFound(id) => DomainError::TransactionNotFound(id).into(),
            other => LedgerError::Store(other),
        }
    }
}

impl From<DailyLimitError> for LedgerError {
    fn from(err: DailyLimitError) -> Self {
        match err {
            DailyLimitError::Domain(e) => e.into(),
            DailyLimitError::Store(e) => e.into(),
        }
    }
}

impl LedgerError {
    pub fn internal(message: impl Into<String>) -> Self {
        LedgerError::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Domain(domain_err) => match domain_err {
                DomainError::Validation(_)
                | DomainError::AmountOutOfRange { .. }
                | DomainError::UnsupportedOperation { .. } => ErrorKind::Validation,
                DomainError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
                DomainError::DailyLimitExceeded { .. } => ErrorKind::DailyLimitExceeded,
                DomainError::SelfTransfer => ErrorKind::SelfTransfer,
                DomainError::InvalidStatusTransition { .. } => ErrorKind::InvalidStatusTransition,
                DomainError::AccountNotFound(_) | DomainError::TransactionNotFound(_) => {
                    ErrorKind::NotFound
                }
            },
            LedgerError::Gateway(_) => ErrorKind::Gateway,
            LedgerError::Store(_)
            | LedgerError::Audit(_)
            | LedgerError::Internal(_)
            | LedgerError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Domain(domain_err) => match domain_err {
                DomainError::Validation(_) => "validation_error",
                DomainError::AmountOutOfRange { .. } => "amount_out_of_range",
                DomainError::UnsupportedOperation { .. } => "unsupported_operation",
                DomainError::InsufficientBalance { .. } => "insufficient_balance",
                DomainError::DailyLimitExceeded { .. } => "daily_limit_exceeded",
                DomainError::SelfTransfer => "self_transfer",
                DomainError::InvalidStatusTransition { .. } => "invalid_status_transition",
                DomainError::AccountNotFound(_) => "account_not_found",
                DomainError::TransactionNotFound(_) => "transaction_not_found",
            },
            LedgerError::Gateway(GatewayError::Timeout) => "gateway_timeout",
            LedgerError::Gateway(GatewayError::Unavailable(_)) => "gateway_unavailable",
            LedgerError::Gateway(GatewayError::Rejected(_)) => "gateway_rejected",
            LedgerError::Store(StoreError::DuplicateExternalReference(_)) => "duplicate_reference",
            LedgerError::Store(_) => "database_error",
            LedgerError::Audit(_) => "audit_error",
            LedgerError::Internal(_) => "internal_error",
            LedgerError::Config(_) => "config_error",
        }
    }

    /// Whether resending the same request (same external reference) may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Gateway(e) => e.is_retryable(),
            LedgerError::Store(e) => e.is_retryable(),
            LedgerError::Audit(_) | LedgerError::Internal(_) => true,
            LedgerError::Domain(_) | LedgerError::Config(_) => false,
        }
    }
}
