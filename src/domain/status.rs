//! Transaction status state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 5] = [
        TransactionStatus::Pending,
        TransactionStatus::Processing,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
        TransactionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
        }
    }

    /// Statuses reachable from this one.
    ///
    /// `FAILED -> PENDING` exists only for manual retries.
    pub fn allowed_transitions(&self) -> &'static [TransactionStatus] {
        use TransactionStatus::*;
        match self {
            Pending => &[Processing, Completed, Failed, Cancelled],
            Processing => &[Completed, Failed],
            Failed => &[Pending],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// No outbound transitions
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Validate a transition, returning the new status.
    pub fn transition(
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<TransactionStatus, DomainError> {
        if from.can_transition_to(to) {
            Ok(to)
        } else {
            Err(DomainError::InvalidStatusTransition { from, to })
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::Validation(format!("unknown transaction status '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    #[test]
    fn test_pending_transitions() {
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for next in TransactionStatus::ALL {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
            assert!(matches!(
                TransactionStatus::transition(Completed, next),
                Err(DomainError::InvalidStatusTransition { from: Completed, .. })
            ));
        }
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Failed.is_terminal());
    }

    #[test]
    fn test_manual_retry_path() {
        let status = TransactionStatus::transition(Pending, Failed).unwrap();
        let status = TransactionStatus::transition(status, Pending).unwrap();
        let status = TransactionStatus::transition(status, Completed).unwrap();
        assert_eq!(status, Completed);
    }

    #[test]
    fn test_failed_cannot_complete_directly() {
        assert!(TransactionStatus::transition(Failed, Completed).is_err());
        assert!(TransactionStatus::transition(Processing, Cancelled).is_err());
    }

    #[test]
    fn test_string_round_trip() {
        for status in TransactionStatus::ALL {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<TransactionStatus>().is_err());
    }
}
