//! In-process loan store, used by tests and local runs without Postgres

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;

use super::{keyset_chunks, LoanRepository, LoanStore, LoanStream};
use crate::{
    error::{AppError, AppResult},
    models::{ActiveMember, Book, Loan, Member, OverdueLoan},
};

#[derive(Default)]
struct Tables {
    books: BTreeMap<i64, Book>,
    members: BTreeMap<i64, Member>,
    loans: BTreeMap<i64, Loan>,
}

impl Tables {
    fn joined(&self, loan: &Loan) -> Option<OverdueLoan> {
        let book = self.books.get(&loan.book_id)?;
        let member = self.members.get(&loan.member_id)?;
        Some(OverdueLoan {
            loan_id: loan.id,
            due_date: loan.due_date?,
            book_title: book.title.clone(),
            member_email: member.email.clone(),
            member_username: member.username.clone(),
            member_first_name: member.first_name.clone(),
        })
    }
}

#[derive(Default)]
pub struct InMemoryLoanStore {
    tables: RwLock<Tables>,
}

impl InMemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_book(&self, book: Book) {
        self.tables.write().books.insert(book.id, book);
    }

    pub fn add_member(&self, member: Member) {
        self.tables.write().members.insert(member.id, member);
    }

    /// Insert or replace a loan as-is, bypassing the loan rules
    pub fn put_loan(&self, loan: Loan) {
        self.tables.write().loans.insert(loan.id, loan);
    }

    pub fn book(&self, book_id: i64) -> Option<Book> {
        self.tables.read().books.get(&book_id).cloned()
    }

    fn overdue_chunk(&self, today: NaiveDate, after_id: i64, limit: usize) -> Vec<OverdueLoan> {
        let tables = self.tables.read();
        tables
            .loans
            .range(after_id + 1..)
            .map(|(_, loan)| loan)
            .filter(|loan| loan.is_overdue(today))
            .filter_map(|loan| tables.joined(loan))
            .take(limit)
            .collect()
    }
}

#[async_trait]
impl LoanStore for InMemoryLoanStore {
    fn overdue_loans(&self, today: NaiveDate, chunk_size: usize) -> LoanStream<'_> {
        keyset_chunks(chunk_size, move |after_id, limit| {
            let chunk = self.overdue_chunk(today, after_id, limit);
            async move { Ok(chunk) }
        })
    }

    async fn overdue_loan(&self, loan_id: i64, today: NaiveDate) -> AppResult<Option<OverdueLoan>> {
        let tables = self.tables.read();
        Ok(tables
            .loans
            .get(&loan_id)
            .filter(|loan| loan.is_overdue(today))
            .and_then(|loan| tables.joined(loan)))
    }
}

#[async_trait]
impl LoanRepository for InMemoryLoanStore {
    async fn get_loan(&self, loan_id: i64) -> AppResult<Loan> {
        self.tables
            .read()
            .loans
            .get(&loan_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))
    }

    async fn create_loan(
        &self,
        book_id: i64,
        member_id: i64,
        loan_date: NaiveDate,
        due_date: NaiveDate,
    ) -> AppResult<Loan> {
        let mut tables = self.tables.write();

        let book = tables
            .books
            .get(&book_id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        if book.available_copies < 1 {
            return Err(AppError::BusinessRule("No available copies.".to_string()));
        }
        if !tables.members.contains_key(&member_id) {
            return Err(AppError::BadRequest("Member does not exist.".to_string()));
        }

        let id = tables.loans.keys().next_back().map_or(1, |last| last + 1);
        let loan = Loan {
            id,
            book_id,
            member_id,
            loan_date,
            due_date: Some(due_date),
            return_date: None,
            is_returned: false,
        };
        tables.loans.insert(id, loan.clone());
        if let Some(book) = tables.books.get_mut(&book_id) {
            book.available_copies -= 1;
        }

        Ok(loan)
    }

    async fn return_loan(
        &self,
        book_id: i64,
        member_id: i64,
        return_date: NaiveDate,
    ) -> AppResult<Loan> {
        let mut tables = self.tables.write();

        if !tables.books.contains_key(&book_id) {
            return Err(AppError::NotFound(format!("Book with id {} not found", book_id)));
        }

        let loan = tables
            .loans
            .values_mut()
            .find(|l| l.book_id == book_id && l.member_id == member_id && !l.is_returned)
            .ok_or_else(|| AppError::BusinessRule("Active loan does not exist.".to_string()))?;
        loan.is_returned = true;
        loan.return_date = Some(return_date);
        let loan = loan.clone();

        if let Some(book) = tables.books.get_mut(&book_id) {
            book.available_copies += 1;
        }

        Ok(loan)
    }

    async fn set_due_date(&self, loan_id: i64, due_date: NaiveDate) -> AppResult<Loan> {
        let mut tables = self.tables.write();
        let loan = tables
            .loans
            .get_mut(&loan_id)
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))?;
        loan.due_date = Some(due_date);
        Ok(loan.clone())
    }

    async fn top_active_members(&self) -> AppResult<Vec<ActiveMember>> {
        let tables = self.tables.read();

        let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
        for loan in tables.loans.values().filter(|l| !l.is_returned) {
            *counts.entry(loan.member_id).or_default() += 1;
        }

        let mut members: Vec<ActiveMember> = counts
            .into_iter()
            .filter_map(|(member_id, active_loans)| {
                tables.members.get(&member_id).map(|member| ActiveMember {
                    member: member.clone(),
                    active_loans,
                })
            })
            .collect();
        members.sort_by(|a, b| {
            b.active_loans
                .cmp(&a.active_loans)
                .then(a.member.id.cmp(&b.member.id))
        });

        Ok(members)
    }
}
