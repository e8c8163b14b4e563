//! Data models for Lendwell

pub mod book;
pub mod loan;
pub mod member;

// Re-export commonly used types
pub use book::Book;
pub use loan::{Loan, OverdueLoan};
pub use member::{ActiveMember, Member};
