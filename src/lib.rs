//! GSALT Ledger Library
//!
//! Transaction ledger core for the GSALT wallet: balances, the transaction
//! state machine, idempotent money movements and a hash-chained audit trail.

pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod gateway;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod policy;
pub mod store;

mod error;

pub use config::{Config, EngineConfig};
pub use domain::{
    Account, Amount, AmountError, Balance, BankDetails, DomainError, OperationContext,
    PaymentMethod, Transaction, TransactionStatus, TransactionType,
};
pub use engine::TransactionEngine;
pub use error::{ErrorKind, LedgerError, LedgerResult};
