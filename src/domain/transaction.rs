//! Transaction rows and their vocabulary types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Amount, DomainError, TransactionStatus};

/// Kind of monetary movement recorded by a transaction row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Topup,
    TransferIn,
    TransferOut,
    Payment,
    GiftIn,
    GiftOut,
    VoucherRedemption,
    Withdrawal,
}

impl TransactionType {
    pub const ALL: [TransactionType; 8] = [
        TransactionType::Topup,
        TransactionType::TransferIn,
        TransactionType::TransferOut,
        TransactionType::Payment,
        TransactionType::GiftIn,
        TransactionType::GiftOut,
        TransactionType::VoucherRedemption,
        TransactionType::Withdrawal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Topup => "TOPUP",
            TransactionType::TransferIn => "TRANSFER_IN",
            TransactionType::TransferOut => "TRANSFER_OUT",
            TransactionType::Payment => "PAYMENT",
            TransactionType::GiftIn => "GIFT_IN",
            TransactionType::GiftOut => "GIFT_OUT",
            TransactionType::VoucherRedemption => "VOUCHER_REDEMPTION",
            TransactionType::Withdrawal => "WITHDRAWAL",
        }
    }

    /// Settled through the gateway by `confirm_payment`
    pub fn is_gateway_collected(&self) -> bool {
        matches!(self, TransactionType::Topup | TransactionType::Payment)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::Validation(format!("unknown transaction type '{}'", s)))
    }
}

/// How a topup or payment is funded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Funded from the wallet's own balance
    WalletBalance,
    VirtualAccount,
    Qris,
    Ewallet,
    CreditCard,
    RetailOutlet,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 6] = [
        PaymentMethod::WalletBalance,
        PaymentMethod::VirtualAccount,
        PaymentMethod::Qris,
        PaymentMethod::Ewallet,
        PaymentMethod::CreditCard,
        PaymentMethod::RetailOutlet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::WalletBalance => "WALLET_BALANCE",
            PaymentMethod::VirtualAccount => "VIRTUAL_ACCOUNT",
            PaymentMethod::Qris => "QRIS",
            PaymentMethod::Ewallet => "EWALLET",
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::RetailOutlet => "RETAIL_OUTLET",
        }
    }

    pub fn is_wallet_funded(&self) -> bool {
        matches!(self, PaymentMethod::WalletBalance)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| DomainError::Validation(format!("unknown payment method '{}'", s)))
    }
}

/// Destination bank account for a withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub bank_code: String,
    pub account_number: String,
    pub account_holder_name: String,
}

impl BankDetails {
    pub fn new(
        bank_code: impl Into<String>,
        account_number: impl Into<String>,
        account_holder_name: impl Into<String>,
    ) -> Self {
        Self {
            bank_code: bank_code.into(),
            account_number: account_number.into(),
            account_holder_name: account_holder_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.bank_code.trim().is_empty() {
            return Err(DomainError::validation("bank_code is required"));
        }
        if self.account_holder_name.trim().is_empty() {
            return Err(DomainError::validation("account_holder_name is required"));
        }
        let number = self.account_number.trim();
        if !(5..=20).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation(
                "account_number must be 5 to 20 digits",
            ));
        }
        Ok(())
    }
}

/// A single ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub fee: i64,
    pub total_amount: i64,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_instructions: Option<serde_json::Value>,
    pub external_reference_id: Option<String>,
    pub external_payment_id: Option<String>,
    pub related_transaction_id: Option<Uuid>,
    pub source_account_id: Option<Uuid>,
    pub destination_account_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Build a fresh row. `total_amount` is always `amount + fee`.
    pub fn new(
        account_id: Uuid,
        transaction_type: TransactionType,
        amount: Amount,
        fee: i64,
        status: TransactionStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            transaction_type,
            amount: amount.units(),
            fee,
            total_amount: amount.units() + fee,
            status,
            description: None,
            payment_method: None,
            payment_instructions: None,
            external_reference_id: None,
            external_payment_id: None,
            related_transaction_id: None,
            source_account_id: None,
            destination_account_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: (status == TransactionStatus::Completed).then_some(now),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    pub fn with_external_reference(mut self, reference: Option<String>) -> Self {
        self.external_reference_id = reference;
        self
    }

    pub fn with_counterparties(mut self, source: Option<Uuid>, destination: Option<Uuid>) -> Self {
        self.source_account_id = source;
        self.destination_account_id = destination;
        self
    }

    /// `amount` as a validated [`Amount`]
    pub fn amount(&self) -> Result<Amount, DomainError> {
        Amount::new(self.amount).map_err(|e| DomainError::validation(e.to_string()))
    }

    /// `total_amount` as a validated [`Amount`]
    pub fn total(&self) -> Result<Amount, DomainError> {
        Amount::new(self.total_amount).map_err(|e| DomainError::validation(e.to_string()))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, returning the previous status.
    ///
    /// Sets `completed_at` when entering COMPLETED.
    pub fn transition_to(&mut self, next: TransactionStatus) -> Result<TransactionStatus, DomainError> {
        let previous = self.status;
        self.status = TransactionStatus::transition(previous, next)?;
        let now = Utc::now();
        self.updated_at = now;
        if next == TransactionStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(previous)
    }
}

/// Link two legs of a transfer or gift to each other.
pub fn link_pair(outgoing: &mut Transaction, incoming: &mut Transaction) {
    outgoing.related_transaction_id = Some(incoming.id);
    incoming.related_transaction_id = Some(outgoing.id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topup(amount: i64) -> Transaction {
        Transaction::new(
            Uuid::new_v4(),
            TransactionType::Topup,
            Amount::new(amount).unwrap(),
            0,
            TransactionStatus::Pending,
        )
    }

    #[test]
    fn test_total_includes_fee() {
        let tx = Transaction::new(
            Uuid::new_v4(),
            TransactionType::Payment,
            Amount::new(10_000).unwrap(),
            70,
            TransactionStatus::Pending,
        );
        assert_eq!(tx.total_amount, 10_070);
        assert!(tx.completed_at.is_none());
    }

    #[test]
    fn test_completed_on_creation_sets_timestamp() {
        let tx = Transaction::new(
            Uuid::new_v4(),
            TransactionType::TransferOut,
            Amount::new(100).unwrap(),
            0,
            TransactionStatus::Completed,
        );
        assert!(tx.completed_at.is_some());
    }

    #[test]
    fn test_transition_to_completed() {
        let mut tx = topup(1_000);
        let previous = tx.transition_to(TransactionStatus::Completed).unwrap();
        assert_eq!(previous, TransactionStatus::Pending);
        assert!(tx.completed_at.is_some());
        assert!(tx.is_terminal());
        assert!(tx.transition_to(TransactionStatus::Failed).is_err());
        assert_eq!(tx.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_link_pair_is_bidirectional() {
        let mut out = topup(100);
        let mut inc = topup(100);
        link_pair(&mut out, &mut inc);
        assert_eq!(out.related_transaction_id, Some(inc.id));
        assert_eq!(inc.related_transaction_id, Some(out.id));
    }

    #[test]
    fn test_type_serializes_upper_snake() {
        let json = serde_json::to_value(TransactionType::VoucherRedemption).unwrap();
        assert_eq!(json, "VOUCHER_REDEMPTION");
        assert_eq!("GIFT_OUT".parse::<TransactionType>().unwrap(), TransactionType::GiftOut);
        assert_eq!("QRIS".parse::<PaymentMethod>().unwrap(), PaymentMethod::Qris);
    }

    #[test]
    fn test_bank_details_validation() {
        assert!(BankDetails::new("BCA", "1234567890", "Budi").validate().is_ok());
        assert!(BankDetails::new("", "1234567890", "Budi").validate().is_err());
        assert!(BankDetails::new("BCA", "12ab567890", "Budi").validate().is_err());
        assert!(BankDetails::new("BCA", "1234", "Budi").validate().is_err());
        assert!(BankDetails::new("BCA", "1234567890", " ").validate().is_err());
    }
}
