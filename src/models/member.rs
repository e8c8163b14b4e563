//! Library member model
//!
//! The member's user account (username, email, names) is flattened into the
//! member record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub membership_date: NaiveDate,
}

/// Member with the number of loans they have not returned yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveMember {
    pub member: Member,
    pub active_loans: i64,
}

/// First name when present and non-blank, username otherwise
pub fn display_name<'a>(first_name: Option<&'a str>, username: &'a str) -> &'a str {
    match first_name.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => username,
    }
}
