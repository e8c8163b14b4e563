//! Notification channel seam
//!
//! The reminder job only needs to send one message to one recipient list
//! and to know whether a failure is worth retrying.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Network or provider trouble, may succeed later
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// Bad address or rejected message, retrying will not help
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Transient(_))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), SendError>;
}

/// Channel that only writes messages to the log
#[derive(Debug, Clone, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        tracing::info!(
            "Notification to {}: {} | {}",
            notification.to.join(", "),
            notification.subject,
            notification.body
        );
        Ok(())
    }
}
