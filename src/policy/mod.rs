//! Limit & Fee Policy
//!
//! Stateless rules: per-operation amount bounds, daily caps and the provider
//! fee schedule. A [`PolicyConfig`] value is handed to the engine at
//! construction.

mod fees;
mod limits;

pub use fees::{FeeRule, FeeSchedule};
pub use limits::{start_of_utc_day, AmountLimit, DailyLimitError, LimitKind, LimitPolicy};

use serde::{Deserialize, Serialize};

/// Limits and fees applied by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub limits: LimitPolicy,
    pub fees: FeeSchedule,
}

impl PolicyConfig {
    pub fn with_limits(mut self, limits: LimitPolicy) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }
}
