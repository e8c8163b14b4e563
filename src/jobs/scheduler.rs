//! Scheduler for the overdue reminder job
//!
//! Triggers the job on a fixed cadence and owns the retry queue: attempt
//! counting and the delay between attempts live here, not in the job.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use super::overdue::{Delivery, JobReport, OverdueReminderJob, ReminderTask, RetrySink};
use crate::{config::RemindersConfig, error::AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total sends per loan and run, the first one included
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
struct RetryQueue {
    tx: mpsc::UnboundedSender<ReminderTask>,
}

impl RetrySink for RetryQueue {
    fn request_retry(&self, task: ReminderTask) {
        if let Err(e) = self.tx.send(task) {
            tracing::warn!("Retry queue closed, loan {} waits for the next run", e.0.loan_id);
        }
    }
}

/// Receiving end of the retry queue
pub struct PendingRetries {
    rx: mpsc::UnboundedReceiver<ReminderTask>,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    job: Arc<OverdueReminderJob>,
    policy: RetryPolicy,
    queue: RetryQueue,
}

impl ReminderScheduler {
    pub fn new(job: Arc<OverdueReminderJob>, policy: RetryPolicy) -> (Self, PendingRetries) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            job,
            policy,
            queue: RetryQueue { tx },
        };
        (scheduler, PendingRetries { rx })
    }

    /// Run the job once now; its retries go to the queue
    pub async fn trigger(&self) -> AppResult<JobReport> {
        self.job.run(&self.queue).await
    }

    /// Handle one queued task: give up past the attempt budget, otherwise
    /// wait the retry delay and re-run the unit of work.
    pub async fn handle_retry(&self, task: ReminderTask) -> Option<Delivery> {
        if task.attempt > self.policy.max_attempts {
            tracing::warn!(
                "Giving up on overdue reminder for loan {} after {} attempts: {}",
                task.loan_id,
                self.policy.max_attempts,
                task.last_error
            );
            return None;
        }

        tokio::time::sleep(self.policy.delay).await;

        let loan_id = task.loan_id;
        let attempt = task.attempt;
        match self.job.retry(task, &self.queue).await {
            Ok(delivery) => {
                tracing::debug!("Retry {} for loan {}: {:?}", attempt, loan_id, delivery);
                Some(delivery)
            }
            Err(e) => {
                tracing::error!("Retry {} for loan {} could not read the loan: {}", attempt, loan_id, e);
                None
            }
        }
    }

    /// Work through queued retries one after another until none are left.
    /// Returns how many tasks were handled.
    pub async fn drain(&self, pending: &mut PendingRetries) -> usize {
        let mut handled = 0;
        while let Ok(task) = pending.rx.try_recv() {
            self.handle_retry(task).await;
            handled += 1;
        }
        handled
    }

    /// Spawn the background loop. With the schedule disabled only retries
    /// queued by manual runs are serviced.
    pub fn spawn(
        self,
        pending: PendingRetries,
        config: &RemindersConfig,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        if config.enabled {
            tokio::spawn(self.run(
                pending,
                Duration::from_secs(config.interval_secs),
                config.run_on_startup,
                shutdown,
            ))
        } else {
            tracing::warn!("Scheduled overdue reminders are disabled, servicing retries only");
            tokio::spawn(self.serve_retries(pending, shutdown))
        }
    }

    /// Trigger the job every `cadence` and service retries until `shutdown`
    /// flips or its sender goes away.
    pub async fn run(
        self,
        pending: PendingRetries,
        cadence: Duration,
        run_on_startup: bool,
        shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(cadence.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !run_on_startup {
            // The first tick completes immediately
            ticker.tick().await;
        }

        tracing::info!(
            "Reminder scheduler started (every {:?}, {} attempts, {:?} between attempts)",
            cadence,
            self.policy.max_attempts,
            self.policy.delay
        );

        self.serve(pending, Some(ticker), shutdown).await;
    }

    /// Service queued retries without ever triggering the job
    pub async fn serve_retries(self, pending: PendingRetries, shutdown: watch::Receiver<bool>) {
        self.serve(pending, None, shutdown).await;
    }

    async fn serve(
        self,
        mut pending: PendingRetries,
        mut ticker: Option<Interval>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    if let Err(e) = self.trigger().await {
                        tracing::error!("Overdue reminder run failed: {}", e);
                    }
                }
                Some(task) = pending.rx.recv() => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.handle_retry(task).await;
                    });
                }
                _ = shutdown.changed() => {
                    tracing::info!("Reminder scheduler stopping");
                    break;
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
