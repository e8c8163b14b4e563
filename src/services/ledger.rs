//! Dedup ledger: remembers which reminders were already sent
//!
//! A key present in the ledger means the reminder it names went out
//! successfully; absence means it was never sent, the send failed before
//! the marker was written, or the marker expired.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::error::AppResult;

/// Notification kind tag for overdue reminder emails
pub const OVERDUE_EMAIL: &str = "overdue_email";

/// `(kind, loan, calendar day)`, rendered as `kind:loan_id:YYYY-MM-DD`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub kind: &'static str,
    pub loan_id: i64,
    pub date: NaiveDate,
}

impl DedupKey {
    pub fn overdue_email(loan_id: i64, date: NaiveDate) -> Self {
        Self {
            kind: OVERDUE_EMAIL,
            loan_id,
            date,
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.loan_id, self.date.format("%Y-%m-%d"))
    }
}

/// Expiring key-value store shared by every worker running the job
#[async_trait]
pub trait DedupLedger: Send + Sync {
    async fn present(&self, key: &DedupKey) -> AppResult<bool>;

    /// Record `key` as present for `ttl`, independently of other keys
    async fn mark(&self, key: &DedupKey, ttl: Duration) -> AppResult<()>;

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Process-local ledger
#[derive(Default)]
pub struct InMemoryLedger {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired markers
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|exp| **exp > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupLedger for InMemoryLedger {
    async fn present(&self, key: &DedupKey) -> AppResult<bool> {
        let mut entries = self.entries.lock();
        let key = key.to_string();
        match entries.get(&key).copied() {
            Some(expires_at) if expires_at > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(&key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn mark(&self, key: &DedupKey, ttl: Duration) -> AppResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        // Keys carry the date, so stale ones are never read again
        entries.retain(|_, expires_at| *expires_at > now);
        entries.insert(key.to_string(), now + ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            DedupKey::overdue_email(42, date(1)).to_string(),
            "overdue_email:42:2024-06-01"
        );
    }

    #[tokio::test]
    async fn test_mark_then_present() {
        let ledger = InMemoryLedger::new();
        let key = DedupKey::overdue_email(42, date(1));

        assert!(!ledger.present(&key).await.unwrap());
        ledger.mark(&key, Duration::from_secs(60)).await.unwrap();
        assert!(ledger.present(&key).await.unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_days_are_independent() {
        let ledger = InMemoryLedger::new();
        ledger
            .mark(&DedupKey::overdue_email(42, date(1)), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!ledger.present(&DedupKey::overdue_email(42, date(2))).await.unwrap());
        assert!(!ledger.present(&DedupKey::overdue_email(43, date(1))).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_marker_is_absent() {
        let ledger = InMemoryLedger::new();
        let expired = DedupKey::overdue_email(1, date(1));
        let live = DedupKey::overdue_email(2, date(1));

        ledger.mark(&expired, Duration::ZERO).await.unwrap();
        ledger.mark(&live, Duration::from_secs(60)).await.unwrap();

        assert!(!ledger.present(&expired).await.unwrap());
        assert!(ledger.present(&live).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_prunes_stale_days() {
        let ledger = InMemoryLedger::new();
        ledger
            .mark(&DedupKey::overdue_email(7, date(1)), Duration::ZERO)
            .await
            .unwrap();
        ledger
            .mark(&DedupKey::overdue_email(7, date(2)), Duration::from_secs(60))
            .await
            .unwrap();

        let entries = ledger.entries.lock();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("overdue_email:7:2024-06-02"));
    }
}
