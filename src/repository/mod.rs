//! Repository layer for loan data
//!
//! [`LoanStore`] is the read-only feed the reminder job consumes;
//! [`LoanRepository`] carries the loan/return/extend mutations.

pub mod in_memory;
pub mod loans;

use std::future::Future;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::{
    error::{AppError, AppResult},
    models::{ActiveMember, Loan, OverdueLoan},
};

pub use in_memory::InMemoryLoanStore;
pub use loans::PostgresLoanStore;

/// Lazy sequence of overdue loans
pub type LoanStream<'a> = BoxStream<'a, AppResult<OverdueLoan>>;

#[async_trait]
pub trait LoanStore: Send + Sync {
    /// Stream loans with `is_returned = false AND due_date < today`, pulled
    /// from storage `chunk_size` rows at a time.
    fn overdue_loans(&self, today: NaiveDate, chunk_size: usize) -> LoanStream<'_>;

    /// Re-read a single loan, `None` if it is gone or no longer overdue
    async fn overdue_loan(&self, loan_id: i64, today: NaiveDate) -> AppResult<Option<OverdueLoan>>;
}

#[async_trait]
pub trait LoanRepository: Send + Sync {
    async fn get_loan(&self, loan_id: i64) -> AppResult<Loan>;

    /// Create a loan and take one copy of the book
    async fn create_loan(
        &self,
        book_id: i64,
        member_id: i64,
        loan_date: NaiveDate,
        due_date: NaiveDate,
    ) -> AppResult<Loan>;

    /// Close the member's active loan of the book and give the copy back
    async fn return_loan(
        &self,
        book_id: i64,
        member_id: i64,
        return_date: NaiveDate,
    ) -> AppResult<Loan>;

    async fn set_due_date(&self, loan_id: i64, due_date: NaiveDate) -> AppResult<Loan>;

    /// Members with at least one unreturned loan, busiest first
    async fn top_active_members(&self) -> AppResult<Vec<ActiveMember>>;
}

/// Build a keyset-paginated stream out of a chunk fetcher.
///
/// `fetch(after_id, limit)` must return loans with `loan_id > after_id`
/// ordered by id. A chunk is only fetched once the previous one has been
/// consumed, so rows changed in the meantime are seen with their current
/// state.
pub(crate) fn keyset_chunks<'a, F, Fut>(chunk_size: usize, fetch: F) -> LoanStream<'a>
where
    F: Fn(i64, usize) -> Fut + Send + 'a,
    Fut: Future<Output = AppResult<Vec<OverdueLoan>>> + Send + 'a,
{
    let chunk_size = chunk_size.max(1);

    stream::try_unfold(Some(0_i64), move |cursor| {
        let pending = cursor.map(|after_id| fetch(after_id, chunk_size));
        async move {
            let Some(pending) = pending else {
                return Ok(None);
            };
            let chunk = pending.await?;
            if chunk.is_empty() {
                return Ok(None);
            }
            // A short chunk is the last one
            let next = match chunk.last() {
                Some(last) if chunk.len() == chunk_size => Some(last.loan_id),
                _ => None,
            };
            Ok::<_, AppError>(Some((chunk, next)))
        }
    })
    .map_ok(|chunk| stream::iter(chunk.into_iter().map(Ok::<_, AppError>)))
    .try_flatten()
    .boxed()
}
