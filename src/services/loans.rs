//! Loan management service

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        loan::{CreateLoan, ExtendDueDate, ReturnLoan},
        ActiveMember, Loan,
    },
    repository::LoanRepository,
};

/// Loan, return and extension rules.
///
/// Exposed to library callers through [`Services`](super::Services); the
/// operator HTTP API does not route to it.
#[derive(Clone)]
pub struct LoansService {
    repository: Arc<dyn LoanRepository>,
    loan_period: Duration,
}

impl LoansService {
    pub fn new(repository: Arc<dyn LoanRepository>, loan_period_days: i64) -> Self {
        Self {
            repository,
            loan_period: Duration::days(loan_period_days),
        }
    }

    /// Lend a copy of a book to a member
    pub async fn loan_book(&self, request: CreateLoan) -> AppResult<Loan> {
        let today = today();
        let loan = self
            .repository
            .create_loan(request.book_id, request.member_id, today, today + self.loan_period)
            .await?;

        tracing::info!(
            "Loan {} created: book {} to member {}, due {:?}",
            loan.id,
            loan.book_id,
            loan.member_id,
            loan.due_date
        );
        Ok(loan)
    }

    /// Return a borrowed book
    pub async fn return_book(&self, request: ReturnLoan) -> AppResult<Loan> {
        let loan = self
            .repository
            .return_loan(request.book_id, request.member_id, today())
            .await?;

        tracing::info!("Loan {} returned", loan.id);
        Ok(loan)
    }

    /// Push the due date back by a positive number of days.
    ///
    /// Already overdue loans cannot be extended. A loan without a due date
    /// is extended from its loan date.
    pub async fn extend_due_date(&self, loan_id: i64, request: ExtendDueDate) -> AppResult<Loan> {
        request.validate()?;

        let loan = self.repository.get_loan(loan_id).await?;
        if loan.due_date.map(|due| due < today()).unwrap_or(false) {
            return Err(AppError::BusinessRule("Due date is already overdue.".to_string()));
        }

        let base = loan.due_date.unwrap_or(loan.loan_date);
        let due_date = Duration::try_days(request.additional_days)
            .and_then(|days| base.checked_add_signed(days))
            .ok_or_else(|| AppError::Validation("additional_days is too large.".to_string()))?;

        self.repository.set_due_date(loan_id, due_date).await
    }

    pub async fn top_active_members(&self) -> AppResult<Vec<ActiveMember>> {
        self.repository.top_active_members().await
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
