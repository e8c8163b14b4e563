//! Loan (borrow) model and related types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::member::display_name;

/// Loan model from database
///
/// `is_returned == false` always comes with `return_date == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: i64,
    pub book_id: i64,
    pub member_id: i64,
    pub loan_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
    pub is_returned: bool,
}

impl Loan {
    /// Overdue means not returned and due strictly before `today`
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.is_returned && self.due_date.map(|due| due < today).unwrap_or(false)
    }
}

/// Overdue loan joined with the book and member data needed for messaging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OverdueLoan {
    pub loan_id: i64,
    pub due_date: NaiveDate,
    pub book_title: String,
    pub member_email: String,
    pub member_username: String,
    pub member_first_name: Option<String>,
}

impl OverdueLoan {
    pub fn display_name(&self) -> &str {
        display_name(self.member_first_name.as_deref(), &self.member_username)
    }
}

/// Create loan request
#[derive(Debug, Deserialize)]
pub struct CreateLoan {
    pub book_id: i64,
    pub member_id: i64,
}

/// Return book request
#[derive(Debug, Deserialize)]
pub struct ReturnLoan {
    pub book_id: i64,
    pub member_id: i64,
}

/// Extend due date request
#[derive(Debug, Deserialize, Validate)]
pub struct ExtendDueDate {
    #[validate(range(min = 1, message = "additional_days must be a positive integer."))]
    pub additional_days: i64,
}
