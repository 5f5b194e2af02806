//! Scheduled Jobs
//!
//! Background jobs for periodic ledger maintenance: cancelling stale PENDING
//! rows and reconciling withdrawals that never settled.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::audit::{AuditRecorder, StatusChange};
use crate::domain::{OperationContext, Transaction, TransactionStatus, TransactionType};
use crate::engine::TransactionEngine;
use crate::error::LedgerError;
use crate::handlers::ReconciliationReport;
use crate::store::{LedgerStore, StoreError};

/// Types the expiry sweep never cancels: a PENDING withdrawal holds a debit
/// and is settled by reconciliation instead.
pub const EXPIRY_EXCLUDED_TYPES: [TransactionType; 1] = [TransactionType::Withdrawal];

/// Shortest period a job loop ticks at; `tokio::time::interval` panics on zero.
const MIN_JOB_INTERVAL: Duration = Duration::from_millis(1);

// =========================================================================
// Pending Expiry Job
// =========================================================================

/// Cancel every PENDING transaction older than `horizon`.
///
/// Safe to run repeatedly or concurrently: rows that already left PENDING
/// are skipped by the store.
pub async fn expire_pending_transactions(
    store: &dyn LedgerStore,
    audit: &dyn AuditRecorder,
    horizon: chrono::Duration,
) -> Result<Vec<Transaction>, JobError> {
    let cutoff = Utc::now() - horizon;
    let reason = format!("expired after {} hours in PENDING", horizon.num_hours());

    let cancelled = store
        .expire_pending(cutoff, &EXPIRY_EXCLUDED_TYPES, &reason)
        .await?;

    let context = OperationContext::system("expiry");
    for tx in &cancelled {
        let change = StatusChange::new(tx.id, Some(TransactionStatus::Pending), tx.status)
            .reason(reason.as_str())
            .context(&context);
        if let Err(e) = audit.record_status_change(change).await {
            tracing::error!(transaction_id = %tx.id, error = %e, "Failed to record expiry");
        }
    }

    if !cancelled.is_empty() {
        tracing::info!(
            rows_cancelled = cancelled.len(),
            cutoff = %cutoff,
            "Cancelled expired pending transactions"
        );
    }

    Ok(cancelled)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for the pending expiry sweep (default: 5 minutes)
    pub expiry_interval: Duration,
    /// Interval for withdrawal reconciliation (default: 1 minute)
    pub reconcile_interval: Duration,
    /// Minimum age of a withdrawal before it is reconciled (default: 15 minutes)
    pub reconcile_after: chrono::Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            expiry_interval: Duration::from_secs(300),
            reconcile_interval: Duration::from_secs(60),
            reconcile_after: chrono::Duration::minutes(15),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditRecorder>,
    engine: Option<Arc<TransactionEngine>>,
    pending_expiry: chrono::Duration,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler running the expiry sweep only
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditRecorder>) -> Self {
        Self::with_config(store, audit, JobSchedulerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(
        store: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditRecorder>,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            store,
            audit,
            engine: None,
            pending_expiry: chrono::Duration::hours(24),
            config,
        }
    }

    pub fn with_pending_expiry(mut self, horizon: chrono::Duration) -> Self {
        self.pending_expiry = horizon;
        self
    }

    /// Also reconcile withdrawals through `engine`
    pub fn with_reconciliation(mut self, engine: Arc<TransactionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!(
            reconciliation = self.engine.is_some(),
            "Job scheduler started"
        );

        let mut expiry_interval = interval(self.config.expiry_interval.max(MIN_JOB_INTERVAL));
        let mut reconcile_interval =
            interval(self.config.reconcile_interval.max(MIN_JOB_INTERVAL));

        loop {
            tokio::select! {
                _ = expiry_interval.tick() => {
                    if let Err(e) = self.expire().await {
                        tracing::error!(error = %e, "Pending expiry sweep failed");
                    }
                }
                _ = reconcile_interval.tick(), if self.engine.is_some() => {
                    if let Some(Err(e)) = self.reconcile().await {
                        tracing::error!(error = %e, "Withdrawal reconciliation failed");
                    }
                }
            }
        }
    }

    async fn expire(&self) -> Result<Vec<Transaction>, JobError> {
        expire_pending_transactions(self.store.as_ref(), self.audit.as_ref(), self.pending_expiry)
            .await
    }

    async fn reconcile(&self) -> Option<Result<ReconciliationReport, JobError>> {
        let engine = self.engine.as_ref()?;
        Some(
            engine
                .reconcile_withdrawals(self.config.reconcile_after)
                .await
                .map_err(JobError::from),
        )
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.expire().await {
            Ok(cancelled) => report.transactions_expired = cancelled.len(),
            Err(e) => report.errors.push(format!("Pending expiry: {}", e)),
        }

        match self.reconcile().await {
            Some(Ok(reconciliation)) => report.reconciliation = Some(reconciliation),
            Some(Err(e)) => report.errors.push(format!("Withdrawal reconciliation: {}", e)),
            None => {}
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub transactions_expired: usize,
    pub reconciliation: Option<ReconciliationReport>,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::domain::{Account, Amount};
    use crate::store::{InMemoryLedgerStore, LedgerUnit};
    use uuid::Uuid;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.expiry_interval, Duration::from_secs(300));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.reconcile_after, chrono::Duration::minutes(15));
    }

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert_eq!(report.transactions_expired, 0);
        assert!(report.reconciliation.is_none());
        assert_eq!(report.errors.len(), 0);
    }

    #[tokio::test]
    async fn test_run_all_once_expires_stale_topups() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let account_id = Uuid::new_v4();
        store.seed_account(Account::open(account_id)).await;

        let mut stale = Transaction::new(
            account_id,
            TransactionType::Topup,
            Amount::new(10_000).unwrap(),
            0,
            TransactionStatus::Pending,
        );
        stale.created_at = Utc::now() - chrono::Duration::hours(25);
        let mut unit = store.begin().await.unwrap();
        unit.insert_transaction(&stale).await.unwrap();
        unit.commit().await.unwrap();

        let scheduler = JobScheduler::new(store.clone(), audit.clone());
        let report = scheduler.run_all_once().await;

        assert_eq!(report.transactions_expired, 1);
        assert!(report.reconciliation.is_none());
        assert!(report.errors.is_empty());

        let row = store.find_transaction(stale.id).await.unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::Cancelled);

        let history = audit.history(stale.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change.to_status, TransactionStatus::Cancelled);
        assert_eq!(history[0].change.metadata["actor"], "system:expiry");

        // second run finds nothing
        assert_eq!(scheduler.run_all_once().await.transactions_expired, 0);
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_stop_the_scheduler() {
        let config = JobSchedulerConfig {
            expiry_interval: Duration::ZERO,
            reconcile_interval: Duration::ZERO,
            ..JobSchedulerConfig::default()
        };
        let scheduler = JobScheduler::with_config(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryAuditLog::new()),
            config,
        );

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
