//! Redis-backed dedup ledger

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};

use super::ledger::{DedupKey, DedupLedger};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct RedisLedger {
    conn: ConnectionManager,
}

impl RedisLedger {
    /// Connect and check the server answers
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to connect to Redis: {}", e)))?;

        let ledger = Self { conn };
        ledger.ping().await?;

        Ok(ledger)
    }
}

#[async_trait]
impl DedupLedger for RedisLedger {
    async fn present(&self, key: &DedupKey) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(key.to_string())
            .await
            .map_err(|e| AppError::Internal(format!("Failed to check {} in Redis: {}", key, e)))?;

        Ok(exists)
    }

    async fn mark(&self, key: &DedupKey, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key.to_string(), 1, seconds)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to store {} in Redis: {}", key, e)))?;

        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis connection test failed: {}", e)))?;

        Ok(())
    }
}
