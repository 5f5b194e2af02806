//! Settlement Gateway
//!
//! Narrow interface to the external payment provider used to collect funds
//! (topups, payments) and disburse them (withdrawals). Provider clients live
//! outside this crate and implement [`SettlementGateway`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::{BankDetails, PaymentMethod};

/// Request for a payable bill (virtual account number, QR code, checkout link...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillRequest {
    pub transaction_id: Uuid,
    /// Total to collect, fee included
    pub amount: i64,
    pub method: PaymentMethod,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayableBill {
    pub gateway_ref: String,
    pub payment_instructions: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub transaction_id: Uuid,
    pub amount: i64,
    pub bank_details: BankDetails,
    /// Providers must treat repeated keys as the same disbursement
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disbursement {
    pub gateway_ref: String,
    pub status: GatewayStatus,
}

/// Settlement status as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayStatus::Pending => write!(f, "pending"),
            GatewayStatus::Completed => write!(f, "completed"),
            GatewayStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Settlement provider failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Settlement gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Settlement gateway rejected the request: {0}")]
    Rejected(String),

    #[error("Settlement gateway timed out")]
    Timeout,
}

impl GatewayError {
    /// Whether resending the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_) | GatewayError::Timeout)
    }
}

/// Settlement Gateway contract.
///
/// Every call must be idempotent on `transaction_id` / `idempotency_key`:
/// the engine resends the same request after a timeout.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn create_payable_bill(&self, request: BillRequest) -> Result<PayableBill, GatewayError>;

    async fn create_disbursement(
        &self,
        request: DisbursementRequest,
    ) -> Result<Disbursement, GatewayError>;

    async fn query_status(&self, gateway_ref: &str) -> Result<GatewayStatus, GatewayError>;
}
