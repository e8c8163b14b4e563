//! Background jobs

pub mod overdue;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use overdue::{Delivery, JobReport, OverdueReminderJob, ReminderSettings, ReminderTask, RetrySink};
pub use scheduler::{PendingRetries, ReminderScheduler, RetryPolicy};
