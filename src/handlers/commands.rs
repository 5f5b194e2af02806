//! Command definitions
//!
//! Commands represent intentions to move money; results carry the rows the
//! engine wrote (or found, for replayed requests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{BankDetails, PaymentMethod, Transaction};

// =========================================================================
// Topup
// =========================================================================

/// Command to fund a wallet through the settlement gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopupCommand {
    pub account_id: Uuid,
    /// Amount in GSALT units, credited on confirmation
    pub amount: i64,
    pub payment_method: PaymentMethod,
    pub description: Option<String>,
    pub external_reference: Option<String>,
}

impl TopupCommand {
    pub fn new(account_id: Uuid, amount: i64, payment_method: PaymentMethod) -> Self {
        Self {
            account_id,
            amount,
            payment_method,
            description: None,
            external_reference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }
}

// =========================================================================
// Transfer
// =========================================================================

/// Command to move funds between two wallets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount: i64,
    pub description: Option<String>,
    pub external_reference: Option<String>,
}

impl TransferCommand {
    pub fn new(source_account_id: Uuid, destination_account_id: Uuid, amount: i64) -> Self {
        Self {
            source_account_id,
            destination_account_id,
            amount,
            description: None,
            external_reference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }
}

// =========================================================================
// Gift
// =========================================================================

/// Command to gift funds.
///
/// Without a sender this is a promotional one-sided credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftCommand {
    pub sender_account_id: Option<Uuid>,
    pub recipient_account_id: Uuid,
    pub amount: i64,
    pub description: Option<String>,
    pub external_reference: Option<String>,
}

impl GiftCommand {
    /// Wallet-to-wallet gift
    pub fn new(sender_account_id: Uuid, recipient_account_id: Uuid, amount: i64) -> Self {
        Self {
            sender_account_id: Some(sender_account_id),
            recipient_account_id,
            amount,
            description: None,
            external_reference: None,
        }
    }

    /// Promotional credit with no sending wallet
    pub fn promotional(recipient_account_id: Uuid, amount: i64) -> Self {
        Self {
            sender_account_id: None,
            recipient_account_id,
            amount,
            description: None,
            external_reference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }
}

// =========================================================================
// Payment
// =========================================================================

/// Command to pay for a purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCommand {
    pub account_id: Uuid,
    pub amount: i64,
    pub payment_method: PaymentMethod,
    pub description: Option<String>,
    pub external_reference: Option<String>,
}

impl PaymentCommand {
    pub fn new(account_id: Uuid, amount: i64, payment_method: PaymentMethod) -> Self {
        Self {
            account_id,
            amount,
            payment_method,
            description: None,
            external_reference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }
}

// =========================================================================
// Withdrawal
// =========================================================================

/// Command to disburse wallet funds to a bank account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalCommand {
    pub account_id: Uuid,
    pub amount: i64,
    pub bank_details: BankDetails,
    pub description: Option<String>,
    pub external_reference: Option<String>,
}

impl WithdrawalCommand {
    pub fn new(account_id: Uuid, amount: i64, bank_details: BankDetails) -> Self {
        Self {
            account_id,
            amount,
            bank_details,
            description: None,
            external_reference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }
}

// =========================================================================
// Voucher
// =========================================================================

/// Command to credit a voucher already validated by the voucher service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherCommand {
    pub account_id: Uuid,
    pub amount: i64,
    pub voucher_code: String,
    pub external_reference: Option<String>,
}

impl VoucherCommand {
    pub fn new(account_id: Uuid, amount: i64, voucher_code: impl Into<String>) -> Self {
        Self {
            account_id,
            amount,
            voucher_code: voucher_code.into(),
            external_reference: None,
        }
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }
}

// =========================================================================
// Results
// =========================================================================

/// How the payer settles a gateway bill; stored on the row as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInstructions {
    pub gateway_ref: String,
    pub instructions: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

impl PaymentInstructions {
    /// Instructions persisted on a gateway-collected row
    pub fn from_transaction(tx: &Transaction) -> Option<Self> {
        tx.payment_instructions
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// Result of a topup request
#[derive(Debug, Clone, Serialize)]
pub struct TopupResult {
    pub transaction: Transaction,
    pub instructions: PaymentInstructions,
    /// The external reference matched an earlier request
    pub replayed: bool,
}

/// Result of a transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub outgoing: Transaction,
    pub incoming: Transaction,
    pub replayed: bool,
}

/// Result of a gift; `outgoing` is `None` for promotional credit
#[derive(Debug, Clone, Serialize)]
pub struct GiftResult {
    pub outgoing: Option<Transaction>,
    pub incoming: Transaction,
    pub replayed: bool,
}

/// Result of a payment; instructions only for externally funded methods
#[derive(Debug, Clone, Serialize)]
pub struct PaymentResult {
    pub transaction: Transaction,
    pub instructions: Option<PaymentInstructions>,
    pub replayed: bool,
}

/// Result of a withdrawal request
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalResult {
    pub transaction: Transaction,
    pub replayed: bool,
}

/// Result of a voucher redemption
#[derive(Debug, Clone, Serialize)]
pub struct VoucherResult {
    pub transaction: Transaction,
    pub replayed: bool,
}

/// Outcome of one withdrawal reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub examined: usize,
    pub redispatched: usize,
    pub completed: usize,
    pub refunded: usize,
    pub still_pending: usize,
    pub errors: usize,
}
