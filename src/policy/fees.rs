//! Provider fee schedule

use serde::{Deserialize, Serialize};

use crate::domain::{Amount, PaymentMethod};

/// How a single payment method is charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FeeRule {
    Free,
    Flat { fee: i64 },
    /// `basis_points` of the amount, rounded up, never below `floor`
    Percentage { basis_points: i64, floor: i64 },
}

impl FeeRule {
    pub fn apply(&self, amount: Amount) -> i64 {
        match *self {
            FeeRule::Free => 0,
            FeeRule::Flat { fee } => fee,
            FeeRule::Percentage {
                basis_points,
                floor,
            } => {
                let raw = amount.units() as i128 * basis_points as i128;
                let fee = (raw + 9_999) / 10_000;
                (fee as i64).max(floor)
            }
        }
    }
}

/// Fee per payment method family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub wallet_balance: FeeRule,
    pub virtual_account: FeeRule,
    pub qris: FeeRule,
    pub ewallet: FeeRule,
    pub credit_card: FeeRule,
    pub retail_outlet: FeeRule,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            wallet_balance: FeeRule::Free,
            virtual_account: FeeRule::Flat { fee: 4_000 },
            qris: FeeRule::Percentage {
                basis_points: 70,
                floor: 100,
            },
            ewallet: FeeRule::Percentage {
                basis_points: 150,
                floor: 100,
            },
            credit_card: FeeRule::Percentage {
                basis_points: 290,
                floor: 2_000,
            },
            retail_outlet: FeeRule::Flat { fee: 5_000 },
        }
    }
}

impl FeeSchedule {
    pub fn rule(&self, method: PaymentMethod) -> FeeRule {
        match method {
            PaymentMethod::WalletBalance => self.wallet_balance,
            PaymentMethod::VirtualAccount => self.virtual_account,
            PaymentMethod::Qris => self.qris,
            PaymentMethod::Ewallet => self.ewallet,
            PaymentMethod::CreditCard => self.credit_card,
            PaymentMethod::RetailOutlet => self.retail_outlet,
        }
    }

    pub fn calculate_fee(&self, method: PaymentMethod, amount: Amount) -> i64 {
        self.rule(method).apply(amount)
    }
}
