//! Overdue reminder job
//!
//! Streams every loan that is not returned and due before today, sends the
//! member one reminder per loan per calendar day and reports counts. The
//! dedup ledger makes repeated or concurrent runs on the same day skip
//! loans that were already reminded. Retryable send failures are handed to
//! the scheduler as single-loan units of work; the job itself never waits
//! or loops on a failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::OverdueLoan,
    repository::LoanStore,
    services::{
        ledger::{DedupKey, DedupLedger},
        notification::{Notification, NotificationChannel},
    },
};

/// Counters for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Reminders sent by this run
    pub processed: u64,
    /// Loans already reminded today
    pub skipped: u64,
    /// Retryable failures handed to the scheduler
    pub deferred: u64,
    /// Permanent failures and ledger errors
    pub failed: u64,
    pub date: NaiveDate,
}

impl JobReport {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            processed: 0,
            skipped: 0,
            deferred: 0,
            failed: 0,
            date,
        }
    }
}

/// A single loan's reminder, queued for another attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderTask {
    pub loan_id: i64,
    pub date: NaiveDate,
    /// Attempt number this task will make, the first send being 1
    pub attempt: u32,
    pub last_error: String,
}

/// Work queue accepting retry requests
pub trait RetrySink: Send + Sync {
    fn request_retry(&self, task: ReminderTask);
}

/// Outcome of one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    AlreadySent,
    Deferred,
    Failed,
    /// Loan returned, extended or deleted since it was queued
    Gone,
}

#[derive(Debug, Clone)]
pub struct ReminderSettings {
    pub chunk_size: usize,
    pub dedup_ttl: Duration,
    pub from: String,
}

pub struct OverdueReminderJob {
    store: Arc<dyn LoanStore>,
    ledger: Arc<dyn DedupLedger>,
    channel: Arc<dyn NotificationChannel>,
    settings: ReminderSettings,
}

impl OverdueReminderJob {
    pub fn new(
        store: Arc<dyn LoanStore>,
        ledger: Arc<dyn DedupLedger>,
        channel: Arc<dyn NotificationChannel>,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            channel,
            settings,
        }
    }

    /// Run for the current UTC date
    pub async fn run(&self, retries: &dyn RetrySink) -> AppResult<JobReport> {
        self.run_for(Utc::now().date_naive(), retries).await
    }

    /// Remind every loan overdue as of `today`.
    ///
    /// Per-loan failures are counted and never stop the run. A loan store
    /// error ends the run with that error; markers already written stay, so
    /// running again resumes where it stopped.
    pub async fn run_for(&self, today: NaiveDate, retries: &dyn RetrySink) -> AppResult<JobReport> {
        let span = tracing::info_span!("overdue_reminders", run_id = %Uuid::new_v4(), date = %today);

        async move {
            tracing::info!("Overdue reminder run started");
            let mut report = JobReport::empty(today);
            let mut loans = self.store.overdue_loans(today, self.settings.chunk_size);

            while let Some(loan) = loans.try_next().await? {
                match self.deliver(&loan, today, 1, retries).await {
                    Delivery::Sent => report.processed += 1,
                    Delivery::AlreadySent => report.skipped += 1,
                    Delivery::Deferred => report.deferred += 1,
                    Delivery::Failed => report.failed += 1,
                    Delivery::Gone => {}
                }
            }

            tracing::info!(
                "Overdue reminder run finished: {} processed, {} skipped, {} deferred, {} failed",
                report.processed,
                report.skipped,
                report.deferred,
                report.failed
            );
            Ok::<_, AppError>(report)
        }
        .instrument(span)
        .await
    }

    /// Attempt one queued reminder again, re-reading the loan first
    pub async fn retry(&self, task: ReminderTask, retries: &dyn RetrySink) -> AppResult<Delivery> {
        match self.store.overdue_loan(task.loan_id, task.date).await? {
            Some(loan) => Ok(self.deliver(&loan, task.date, task.attempt, retries).await),
            None => {
                tracing::info!("Loan {} is no longer overdue, dropping its reminder", task.loan_id);
                Ok(Delivery::Gone)
            }
        }
    }

    async fn deliver(
        &self,
        loan: &OverdueLoan,
        date: NaiveDate,
        attempt: u32,
        retries: &dyn RetrySink,
    ) -> Delivery {
        let key = DedupKey::overdue_email(loan.loan_id, date);

        match self.ledger.present(&key).await {
            Ok(true) => {
                tracing::debug!("Reminder {} already sent", key);
                return Delivery::AlreadySent;
            }
            Ok(false) => {}
            Err(e) => {
                // Without the guard a send could duplicate, leave it for the next run
                tracing::error!("Dedup ledger unavailable for loan {}: {}", loan.loan_id, e);
                return Delivery::Failed;
            }
        }

        let notification = overdue_notice(loan, &self.settings.from);
        match self.channel.send(&notification).await {
            Ok(()) => {
                if let Err(e) = self.ledger.mark(&key, self.settings.dedup_ttl).await {
                    tracing::error!("Reminder for loan {} sent but not recorded: {}", loan.loan_id, e);
                }
                tracing::debug!("Reminder sent for loan {} (attempt {})", loan.loan_id, attempt);
                Delivery::Sent
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    "Reminder for loan {} failed on attempt {}: {}",
                    loan.loan_id,
                    attempt,
                    e
                );
                retries.request_retry(ReminderTask {
                    loan_id: loan.loan_id,
                    date,
                    attempt: attempt + 1,
                    last_error: e.to_string(),
                });
                Delivery::Deferred
            }
            Err(e) => {
                tracing::error!("Reminder for loan {} rejected: {}", loan.loan_id, e);
                Delivery::Failed
            }
        }
    }
}

/// Reminder addressed to the member, naming the overdue book
pub fn overdue_notice(loan: &OverdueLoan, from: &str) -> Notification {
    Notification {
        subject: format!("Overdue Notice: {}", loan.book_title),
        body: format!(
            "Dear {},\n\nOur records show that your loan for \"{}\" was due on {} and is now overdue. Please return the book.",
            loan.display_name(),
            loan.book_title,
            loan.due_date.format("%Y-%m-%d")
        ),
        from: from.to_string(),
        to: vec![loan.member_email.clone()],
    }
}
