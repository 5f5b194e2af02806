//! Idempotency Resolver
//!
//! Plain unique-key lookup on `external_reference_id`, performed before any
//! row lock is taken.

use std::sync::Arc;

use crate::domain::{DomainError, Transaction};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{LedgerStore, StoreError};

/// Longest accepted external reference
pub const MAX_REFERENCE_LEN: usize = 255;

/// Resolves caller-supplied external references to prior transactions
#[derive(Clone)]
pub struct IdempotencyResolver {
    store: Arc<dyn LedgerStore>,
}

impl IdempotencyResolver {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Trim the reference; blank means "no reference".
    pub fn normalize(reference: Option<&str>) -> Result<Option<String>, DomainError> {
        let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(None);
        };
        if reference.chars().count() > MAX_REFERENCE_LEN {
            return Err(DomainError::validation(format!(
                "external reference must be at most {} characters",
                MAX_REFERENCE_LEN
            )));
        }
        Ok(Some(reference.to_string()))
    }

    /// The transaction already recorded under `reference`, if any.
    pub async fn resolve(&self, reference: Option<&str>) -> LedgerResult<Option<Transaction>> {
        let Some(reference) = Self::normalize(reference)? else {
            return Ok(None);
        };

        let existing = self.store.find_transaction_by_external_ref(&reference).await?;
        if let Some(tx) = &existing {
            tracing::info!(
                external_reference = %reference,
                transaction_id = %tx.id,
                status = %tx.status,
                "Duplicate request resolved to existing transaction"
            );
        }
        Ok(existing)
    }

    /// Turn a lost unique-key race into the winner's transaction.
    ///
    /// Any other store error is passed through unchanged.
    pub async fn recover_duplicate(&self, err: StoreError) -> LedgerResult<Transaction> {
        let StoreError::DuplicateExternalReference(reference) = err else {
            return Err(err.into());
        };

        tracing::info!(
            external_reference = %reference,
            "Concurrent duplicate lost the insert race, returning the winner"
        );
        self.store
            .find_transaction_by_external_ref(&reference)
            .await?
            .ok_or_else(|| {
                LedgerError::internal(format!(
                    "external reference {} reported as duplicate but not found",
                    reference
                ))
            })
    }
}
