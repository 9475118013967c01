//! # Redis
//!
//! RAM database.
//!
//! Core purpose is to hold live read tokens and who has already been credited for what. Also, used for
//! the atomic take that makes every token single-use.
//!
//! ## Requirements
//!
//! - Fast lookups
//! - Tokens expire on their own, nobody has to sweep
//! - A token can be taken exactly once, even with two submits racing
//!
//! ## Implementation
//!
//! - `read_session:{id}`: JSON session record, `SET EX` token TTL
//! - `read_spent:{id}`: marker left behind by a take so replays read as consumed, same TTL
//! - `read_credits:{user}`: set of credited article ids
//! - `article_minutes`: hash article id -> declared reading minutes
//! - `read_points`: hash user -> points
//! - The take is one Lua script: `GETDEL` the record, leave the spent marker, or report what was there.
//!   Scripts run atomically so only one caller ever sees the value and a crash cannot split the steps.
use std::time::Duration;

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde_json::{Value, json};

use crate::{
    session::{Consumption, ReadingSession},
    store::{CreditLedger, SessionStore, StoreError},
};

const SESSION_PREFIX: &str = "read_session";
const SPENT_PREFIX: &str = "read_spent";
const CREDITS_PREFIX: &str = "read_credits";
const ARTICLE_MINUTES: &str = "article_minutes";
const POINTS: &str = "read_points";

// KEYS[1] session, KEYS[2] spent marker, ARGV[1] marker TTL in seconds
const TAKE_SCRIPT: &str = r"
local record = redis.call('GETDEL', KEYS[1])
if record then
    redis.call('SET', KEYS[2], 1, 'EX', ARGV[1])
    return {'live', record}
end
if redis.call('EXISTS', KEYS[2]) == 1 then
    return {'spent'}
end
return {'unknown'}
";

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    client.get_connection_manager_with_config(config).await
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    spent_ttl: Duration,
    take_script: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager, spent_ttl: Duration) -> Self {
        Self {
            connection,
            spent_ttl,
            take_script: Script::new(TAKE_SCRIPT),
        }
    }
}

fn key(prefix: &str, id: &str) -> String {
    format!("{prefix}:{id}")
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn consumption(reply: Vec<String>) -> Result<Consumption, StoreError> {
    match reply.as_slice() {
        [state, record] if state == "live" => Ok(Consumption::Live(serde_json::from_str(record)?)),
        [state] if state == "spent" => Ok(Consumption::Consumed),
        [state] if state == "unknown" => Ok(Consumption::Unknown),
        _ => Err(StoreError::UnexpectedReply(reply.join(" "))),
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn put(&self, session: &ReadingSession, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let record = serde_json::to_string(session)?;

        let _: () = connection
            .set_ex(key(SESSION_PREFIX, &session.token_id), record, ttl_secs(ttl))
            .await?;

        Ok(())
    }

    async fn take(&self, token_id: &str) -> Result<Consumption, StoreError> {
        let mut connection = self.connection.clone();

        let reply: Vec<String> = self
            .take_script
            .key(key(SESSION_PREFIX, token_id))
            .key(key(SPENT_PREFIX, token_id))
            .arg(ttl_secs(self.spent_ttl))
            .invoke_async(&mut connection)
            .await?;

        consumption(reply)
    }
}

#[async_trait]
impl CreditLedger for RedisStore {
    async fn reading_minutes(&self, article_id: &str) -> Result<Option<u32>, StoreError> {
        let mut connection = self.connection.clone();

        let minutes: Option<u32> = connection.hget(ARTICLE_MINUTES, article_id).await?;

        Ok(minutes)
    }

    async fn is_credited(&self, user_id: &str, article_id: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();

        let credited: bool = connection
            .sismember(key(CREDITS_PREFIX, user_id), article_id)
            .await?;

        Ok(credited)
    }

    async fn grant(
        &self,
        user_id: &str,
        article_id: &str,
        points: u64,
    ) -> Result<Value, StoreError> {
        let mut connection = self.connection.clone();
        let credits = key(CREDITS_PREFIX, user_id);

        let added: i64 = connection.sadd(&credits, article_id).await?;
        let newly_credited = added > 0;

        let total: i64 = if newly_credited {
            connection.hincr(POINTS, user_id, points as i64).await?
        } else {
            let total: Option<i64> = connection.hget(POINTS, user_id).await?;
            total.unwrap_or(0)
        };
        let articles_read: u64 = connection.scard(&credits).await?;

        Ok(json!({
            "points": total,
            "articlesRead": articles_read,
            "newlyCredited": newly_credited,
        }))
    }
}
