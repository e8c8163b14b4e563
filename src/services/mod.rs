//! Business logic services

pub mod email;
pub mod ledger;
pub mod loans;
pub mod notification;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::AppConfig,
    jobs::{OverdueReminderJob, PendingRetries, ReminderScheduler, ReminderSettings, RetryPolicy},
    repository::{LoanRepository, LoanStore},
};

use ledger::DedupLedger;
use notification::NotificationChannel;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub loans: loans::LoansService,
    pub reminders: ReminderScheduler,
    pub ledger: Arc<dyn DedupLedger>,
}

impl Services {
    /// Wire the services around one loan store. The returned queue feeds
    /// [`ReminderScheduler::run`].
    pub fn new<S>(
        store: Arc<S>,
        ledger: Arc<dyn DedupLedger>,
        channel: Arc<dyn NotificationChannel>,
        config: &AppConfig,
    ) -> (Self, PendingRetries)
    where
        S: LoanStore + LoanRepository + 'static,
    {
        let reminders = &config.reminders;
        let job = OverdueReminderJob::new(
            store.clone(),
            ledger.clone(),
            channel,
            ReminderSettings {
                chunk_size: reminders.chunk_size,
                dedup_ttl: Duration::from_secs(reminders.dedup_ttl_secs),
                from: config.email.from_address(),
            },
        );
        let policy = RetryPolicy {
            max_attempts: reminders.max_attempts,
            delay: Duration::from_secs(reminders.retry_delay_secs),
        };
        let (scheduler, pending) = ReminderScheduler::new(Arc::new(job), policy);

        let services = Self {
            loans: loans::LoansService::new(store, config.loans.loan_period_days),
            reminders: scheduler,
            ledger,
        };
        (services, pending)
    }
}
