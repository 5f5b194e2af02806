//! Amount bounds and daily aggregate caps

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Amount, DomainError, TransactionType};
use crate::store::{LedgerStore, StoreError};

/// Operation families that carry their own limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Topup,
    Transfer,
    Payment,
    Withdrawal,
    Gift,
    Voucher,
}

impl LimitKind {
    pub const ALL: [LimitKind; 6] = [
        LimitKind::Topup,
        LimitKind::Transfer,
        LimitKind::Payment,
        LimitKind::Withdrawal,
        LimitKind::Gift,
        LimitKind::Voucher,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Topup => "topup",
            LimitKind::Transfer => "transfer",
            LimitKind::Payment => "payment",
            LimitKind::Withdrawal => "withdrawal",
            LimitKind::Gift => "gift",
            LimitKind::Voucher => "voucher",
        }
    }

    /// Upper-case key used in `LIMIT_<KIND>_*` environment overrides
    pub fn env_key(&self) -> &'static str {
        match self {
            LimitKind::Topup => "TOPUP",
            LimitKind::Transfer => "TRANSFER",
            LimitKind::Payment => "PAYMENT",
            LimitKind::Withdrawal => "WITHDRAWAL",
            LimitKind::Gift => "GIFT",
            LimitKind::Voucher => "VOUCHER",
        }
    }

    /// Row type whose completed amounts count against the daily cap
    pub fn ledger_type(&self) -> TransactionType {
        match self {
            LimitKind::Topup => TransactionType::Topup,
            LimitKind::Transfer => TransactionType::TransferOut,
            LimitKind::Payment => TransactionType::Payment,
            LimitKind::Withdrawal => TransactionType::Withdrawal,
            LimitKind::Gift => TransactionType::GiftOut,
            LimitKind::Voucher => TransactionType::VoucherRedemption,
        }
    }
}

/// Inclusive bounds for a single operation and an optional per-day cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountLimit {
    pub min: i64,
    pub max: i64,
    pub daily_cap: Option<i64>,
}

impl AmountLimit {
    pub const fn new(min: i64, max: i64, daily_cap: Option<i64>) -> Self {
        Self { min, max, daily_cap }
    }

    pub fn contains(&self, amount: i64) -> bool {
        (self.min..=self.max).contains(&amount)
    }
}

/// Per-operation limits, injected into the engine at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    pub topup: AmountLimit,
    pub transfer: AmountLimit,
    pub payment: AmountLimit,
    pub withdrawal: AmountLimit,
    pub gift: AmountLimit,
    pub voucher: AmountLimit,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            topup: AmountLimit::new(1_000, 5_000_000, None),
            transfer: AmountLimit::new(100, 2_500_000, Some(10_000_000)),
            payment: AmountLimit::new(100, 1_000_000, Some(5_000_000)),
            withdrawal: AmountLimit::new(100, 2_500_000, Some(10_000_000)),
            gift: AmountLimit::new(100, 2_500_000, None),
            voucher: AmountLimit::new(100, 5_000_000, None),
        }
    }
}

impl LimitPolicy {
    pub fn limit(&self, kind: LimitKind) -> &AmountLimit {
        match kind {
            LimitKind::Topup => &self.topup,
            LimitKind::Transfer => &self.transfer,
            LimitKind::Payment => &self.payment,
            LimitKind::Withdrawal => &self.withdrawal,
            LimitKind::Gift => &self.gift,
            LimitKind::Voucher => &self.voucher,
        }
    }

    pub fn limit_mut(&mut self, kind: LimitKind) -> &mut AmountLimit {
        match kind {
            LimitKind::Topup => &mut self.topup,
            LimitKind::Transfer => &mut self.transfer,
            LimitKind::Payment => &mut self.payment,
            LimitKind::Withdrawal => &mut self.withdrawal,
            LimitKind::Gift => &mut self.gift,
            LimitKind::Voucher => &mut self.voucher,
        }
    }

    pub fn with_limit(mut self, kind: LimitKind, limit: AmountLimit) -> Self {
        *self.limit_mut(kind) = limit;
        self
    }

    /// Reject amounts outside `[min, max]` for the operation.
    pub fn validate_amount(&self, kind: LimitKind, amount: Amount) -> Result<(), DomainError> {
        let limit = self.limit(kind);
        if !limit.contains(amount.units()) {
            return Err(DomainError::AmountOutOfRange {
                operation: kind.as_str(),
                amount: amount.units(),
                min: limit.min,
                max: limit.max,
            });
        }
        Ok(())
    }

    /// Compare today's usage plus the request against the cap.
    pub fn check_daily_usage(
        &self,
        kind: LimitKind,
        used: i64,
        amount: Amount,
    ) -> Result<(), DomainError> {
        let Some(cap) = self.limit(kind).daily_cap else {
            return Ok(());
        };
        if used.saturating_add(amount.units()) > cap {
            return Err(DomainError::DailyLimitExceeded {
                operation: kind.as_str(),
                used,
                requested: amount.units(),
                cap,
            });
        }
        Ok(())
    }

    /// Best-effort daily cap check against completed rows since UTC midnight.
    ///
    /// Runs without locks; the balance invariant still holds if two requests
    /// race past it.
    pub async fn check_daily_limit(
        &self,
        store: &dyn LedgerStore,
        account_id: Uuid,
        kind: LimitKind,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<(), DailyLimitError> {
        if self.limit(kind).daily_cap.is_none() {
            return Ok(());
        }
        let used = store
            .sum_completed_amount(account_id, kind.ledger_type(), start_of_utc_day(now))
            .await?;
        self.check_daily_usage(kind, used, amount)?;
        Ok(())
    }
}

/// Failure of the store-backed daily check
#[derive(Debug, thiserror::Error)]
pub enum DailyLimitError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Midnight UTC of the day containing `now`
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}
