//! Fixtures shared by the job and scheduler tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;

use super::overdue::{OverdueReminderJob, ReminderSettings, ReminderTask, RetrySink};
use crate::{
    error::{AppError, AppResult},
    models::{Book, Loan, Member, OverdueLoan},
    repository::{InMemoryLoanStore, LoanStore, LoanStream},
    services::{
        ledger::{DedupKey, DedupLedger, InMemoryLedger},
        notification::MockNotificationChannel,
    },
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn settings() -> ReminderSettings {
    ReminderSettings {
        chunk_size: 2,
        dedup_ttl: Duration::from_secs(24 * 3600),
        from: "Lendwell Library <noreply@lendwell.org>".to_string(),
    }
}

/// Books 1..=3 and members 1..=3; member `n` borrows book `n` in [`loan`]
pub fn seeded_store() -> Arc<InMemoryLoanStore> {
    let store = Arc::new(InMemoryLoanStore::new());
    for (id, title) in [(1, "Dune"), (2, "Emma"), (3, "Ulysses")] {
        store.add_book(Book {
            id,
            title: title.to_string(),
            author_id: None,
            isbn: None,
            available_copies: 1,
        });
    }
    for (id, username, first_name, email) in [
        (1, "ada_l", Some("Ada"), "ada@example.org"),
        (2, "bo_reads", None, "bo@example.org"),
        (3, "carl", Some(""), "carl@example.org"),
    ] {
        store.add_member(Member {
            id,
            username: username.to_string(),
            email: email.to_string(),
            first_name: first_name.map(str::to_string),
            last_name: None,
            membership_date: date(2023, 1, 1),
        });
    }
    store
}

pub fn loan(id: i64, member_id: i64, due_date: Option<NaiveDate>, is_returned: bool) -> Loan {
    Loan {
        id,
        book_id: member_id,
        member_id,
        loan_date: date(2024, 1, 1),
        due_date,
        return_date: is_returned.then(|| date(2024, 1, 15)),
        is_returned,
    }
}

pub fn job(
    store: Arc<InMemoryLoanStore>,
    ledger: Arc<InMemoryLedger>,
    channel: MockNotificationChannel,
) -> OverdueReminderJob {
    OverdueReminderJob::new(store, ledger, Arc::new(channel), settings())
}

#[derive(Default)]
pub struct RecordingSink {
    tasks: Mutex<Vec<ReminderTask>>,
}

impl RecordingSink {
    pub fn tasks(&self) -> Vec<ReminderTask> {
        self.tasks.lock().clone()
    }
}

impl RetrySink for RecordingSink {
    fn request_retry(&self, task: ReminderTask) {
        self.tasks.lock().push(task);
    }
}

pub struct FailingLedger;

#[async_trait]
impl DedupLedger for FailingLedger {
    async fn present(&self, _key: &DedupKey) -> AppResult<bool> {
        Err(AppError::Internal("ledger offline".to_string()))
    }

    async fn mark(&self, _key: &DedupKey, _ttl: Duration) -> AppResult<()> {
        Err(AppError::Internal("ledger offline".to_string()))
    }
}

pub struct OfflineStore;

#[async_trait]
impl LoanStore for OfflineStore {
    fn overdue_loans(&self, _today: NaiveDate, _chunk_size: usize) -> LoanStream<'_> {
        stream::once(async { Err(AppError::Internal("store offline".to_string())) }).boxed()
    }

    async fn overdue_loan(&self, _loan_id: i64, _today: NaiveDate) -> AppResult<Option<OverdueLoan>> {
        Err(AppError::Internal("store offline".to_string()))
    }
}
