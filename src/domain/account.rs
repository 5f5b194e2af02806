//! Account
//!
//! Balance-holding wallet account. Rows are created by the identity-linking
//! flow outside this crate; the ledger only mutates them under a row lease.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, Balance, DomainError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub balance: Balance,
    /// Loyalty counter, not balance-guarded
    pub points: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// New empty account
    pub fn open(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: Balance::zero(),
            points: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_balance(mut self, balance: Balance) -> Self {
        self.balance = balance;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Increase the balance by `amount`.
    pub fn credit(&mut self, amount: Amount) -> Result<(), DomainError> {
        self.balance = self
            .balance
            .credit(amount)
            .map_err(|e| DomainError::validation(e.to_string()))?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Decrease the balance by `amount`, rejecting overdrafts.
    pub fn debit(&mut self, amount: Amount) -> Result<(), DomainError> {
        if !self.balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_balance(
                amount.units(),
                self.balance.units(),
            ));
        }
        self.balance = self
            .balance
            .debit(amount)
            .map_err(|e| DomainError::validation(e.to_string()))?;
        self.updated_at = Utc::now();
        Ok(())
    }
}
