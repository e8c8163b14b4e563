//! Loans repository for database operations

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres, Row};

use super::{keyset_chunks, LoanRepository, LoanStore, LoanStream};
use crate::{
    error::{AppError, AppResult},
    models::{ActiveMember, Loan, Member, OverdueLoan},
};

const OVERDUE_COLUMNS: &str = r#"
    SELECT l.id AS loan_id, l.due_date, b.title AS book_title,
           m.email AS member_email, m.username AS member_username,
           m.first_name AS member_first_name
    FROM loans l
    JOIN books b ON b.id = l.book_id
    JOIN members m ON m.id = l.member_id
    WHERE l.is_returned = FALSE AND l.due_date < $1
"#;

#[derive(Clone)]
pub struct PostgresLoanStore {
    pool: Pool<Postgres>,
}

impl PostgresLoanStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoanStore for PostgresLoanStore {
    fn overdue_loans(&self, today: NaiveDate, chunk_size: usize) -> LoanStream<'_> {
        let pool = self.pool.clone();
        let query = format!("{} AND l.id > $2 ORDER BY l.id LIMIT $3", OVERDUE_COLUMNS);

        keyset_chunks(chunk_size, move |after_id, limit| {
            let pool = pool.clone();
            let query = query.clone();
            async move {
                let chunk = sqlx::query_as::<_, OverdueLoan>(&query)
                    .bind(today)
                    .bind(after_id)
                    .bind(limit as i64)
                    .fetch_all(&pool)
                    .await?;
                tracing::debug!("Fetched {} overdue loans after id {}", chunk.len(), after_id);
                Ok(chunk)
            }
        })
    }

    async fn overdue_loan(&self, loan_id: i64, today: NaiveDate) -> AppResult<Option<OverdueLoan>> {
        let query = format!("{} AND l.id = $2", OVERDUE_COLUMNS);
        let loan = sqlx::query_as::<_, OverdueLoan>(&query)
            .bind(today)
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }
}

#[async_trait]
impl LoanRepository for PostgresLoanStore {
    async fn get_loan(&self, loan_id: i64) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))
    }

    async fn create_loan(
        &self,
        book_id: i64,
        member_id: i64,
        loan_date: NaiveDate,
        due_date: NaiveDate,
    ) -> AppResult<Loan> {
        let mut tx = self.pool.begin().await?;

        // Lock the book row so two loans cannot take the last copy
        let available: i32 = sqlx::query_scalar(
            "SELECT available_copies FROM books WHERE id = $1 FOR UPDATE",
        )
        .bind(book_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;

        if available < 1 {
            return Err(AppError::BusinessRule("No available copies.".to_string()));
        }

        let member_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM members WHERE id = $1)")
                .bind(member_id)
                .fetch_one(&mut *tx)
                .await?;

        if !member_exists {
            return Err(AppError::BadRequest("Member does not exist.".to_string()));
        }

        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (book_id, member_id, loan_date, due_date, return_date, is_returned)
            VALUES ($1, $2, $3, $4, NULL, FALSE)
            RETURNING *
            "#,
        )
        .bind(book_id)
        .bind(member_id)
        .bind(loan_date)
        .bind(due_date)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE books SET available_copies = available_copies - 1 WHERE id = $1")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(loan)
    }

    async fn return_loan(
        &self,
        book_id: i64,
        member_id: i64,
        return_date: NaiveDate,
    ) -> AppResult<Loan> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM books WHERE id = $1 FOR UPDATE")
            .bind(book_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;

        let loan_id: i64 = sqlx::query_scalar(
            r#"
            SELECT id FROM loans
            WHERE book_id = $1 AND member_id = $2 AND is_returned = FALSE
            ORDER BY id
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(book_id)
        .bind(member_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::BusinessRule("Active loan does not exist.".to_string()))?;

        let loan = sqlx::query_as::<_, Loan>(
            "UPDATE loans SET is_returned = TRUE, return_date = $1 WHERE id = $2 RETURNING *",
        )
        .bind(return_date)
        .bind(loan_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE books SET available_copies = available_copies + 1 WHERE id = $1")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(loan)
    }

    async fn set_due_date(&self, loan_id: i64, due_date: NaiveDate) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("UPDATE loans SET due_date = $1 WHERE id = $2 RETURNING *")
            .bind(due_date)
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))
    }

    async fn top_active_members(&self) -> AppResult<Vec<ActiveMember>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.username, m.email, m.first_name, m.last_name, m.membership_date,
                   COUNT(l.id) AS active_loans
            FROM members m
            JOIN loans l ON l.member_id = m.id AND l.is_returned = FALSE
            GROUP BY m.id
            ORDER BY active_loans DESC, m.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let members = rows
            .into_iter()
            .map(|row| ActiveMember {
                member: Member {
                    id: row.get("id"),
                    username: row.get("username"),
                    email: row.get("email"),
                    first_name: row.get("first_name"),
                    last_name: row.get("last_name"),
                    membership_date: row.get("membership_date"),
                },
                active_loans: row.get("active_loans"),
            })
            .collect();

        Ok(members)
    }
}
