use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::session::{Consumption, ReadingSession};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt session record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

/// Holds issued reading sessions. `take` must hand a live session out at most once.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session: &ReadingSession, ttl: Duration) -> Result<(), StoreError>;

    async fn take(&self, token_id: &str) -> Result<Consumption, StoreError>;
}

/// The slice of the points system this service talks to.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Declared reading time, `None` if the article is unknown.
    async fn reading_minutes(&self, article_id: &str) -> Result<Option<u32>, StoreError>;

    async fn is_credited(&self, user_id: &str, article_id: &str) -> Result<bool, StoreError>;

    /// Records the read at most once per `(user, article)` and returns the user's progress.
    async fn grant(&self, user_id: &str, article_id: &str, points: u64)
    -> Result<Value, StoreError>;
}
