//! Domain module
//!
//! Core ledger types and business rules.

pub mod account;
pub mod amount;
pub mod context;
pub mod error;
pub mod status;
pub mod transaction;

pub use account::Account;
pub use amount::{Amount, AmountError, Balance, MAX_UNITS, UNITS_PER_DISPLAY};
pub use context::OperationContext;
pub use error::DomainError;
pub use status::TransactionStatus;
pub use transaction::{link_pair, BankDetails, PaymentMethod, Transaction, TransactionType};
