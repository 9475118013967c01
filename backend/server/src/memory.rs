//! In-process stand-in for redis. Same semantics, nothing survives a restart.
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use payloads::{Clock, SystemClock};
use serde_json::{Value, json};

use crate::{
    session::{Consumption, ReadingSession},
    store::{CreditLedger, SessionStore, StoreError},
};

enum Slot {
    Live(ReadingSession),
    Spent,
}

struct Entry {
    slot: Slot,
    expires_at_ms: i64,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    article_minutes: HashMap<String, u32>,
    credits: HashMap<String, HashSet<String>>,
    points: HashMap<String, u64>,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    spent_ttl: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Duration::from_secs(7200))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>, spent_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
            spent_ttl,
        }
    }

    pub fn with_article(self, article_id: impl Into<String>, reading_minutes: u32) -> Self {
        self.lock()
            .article_minutes
            .insert(article_id.into(), reading_minutes);
        self
    }

    pub fn with_credit(self, user_id: impl Into<String>, article_id: impl Into<String>) -> Self {
        self.lock()
            .credits
            .entry(user_id.into())
            .or_default()
            .insert(article_id.into());
        self
    }

    pub fn points(&self, user_id: &str) -> u64 {
        self.lock().points.get(user_id).copied().unwrap_or(0)
    }

    /// Live (unconsumed, unexpired) sessions.
    pub fn live_sessions(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let mut inner = self.lock();
        purge(&mut inner, now_ms);

        inner
            .sessions
            .values()
            .filter(|entry| matches!(entry.slot, Slot::Live(_)))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panic mid-update leaves only whole map operations behind
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn purge(inner: &mut Inner, now_ms: i64) {
    inner
        .sessions
        .retain(|_, entry| entry.expires_at_ms > now_ms);
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put(&self, session: &ReadingSession, ttl: Duration) -> Result<(), StoreError> {
        let now_ms = self.clock.now_ms();
        let mut inner = self.lock();
        purge(&mut inner, now_ms);

        inner.sessions.insert(
            session.token_id.clone(),
            Entry {
                slot: Slot::Live(session.clone()),
                expires_at_ms: now_ms.saturating_add(ttl_ms(ttl)),
            },
        );

        Ok(())
    }

    async fn take(&self, token_id: &str) -> Result<Consumption, StoreError> {
        let now_ms = self.clock.now_ms();
        let mut inner = self.lock();
        purge(&mut inner, now_ms);

        let Some(entry) = inner.sessions.get_mut(token_id) else {
            return Ok(Consumption::Unknown);
        };

        match std::mem::replace(&mut entry.slot, Slot::Spent) {
            Slot::Live(session) => {
                entry.expires_at_ms = now_ms.saturating_add(ttl_ms(self.spent_ttl));
                Ok(Consumption::Live(session))
            }
            Slot::Spent => Ok(Consumption::Consumed),
        }
    }
}

#[async_trait]
impl CreditLedger for MemoryStore {
    async fn reading_minutes(&self, article_id: &str) -> Result<Option<u32>, StoreError> {
        Ok(self.lock().article_minutes.get(article_id).copied())
    }

    async fn is_credited(&self, user_id: &str, article_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .credits
            .get(user_id)
            .is_some_and(|articles| articles.contains(article_id)))
    }

    async fn grant(
        &self,
        user_id: &str,
        article_id: &str,
        points: u64,
    ) -> Result<Value, StoreError> {
        let mut inner = self.lock();

        let newly_credited = inner
            .credits
            .entry(user_id.to_string())
            .or_default()
            .insert(article_id.to_string());

        let total = inner.points.entry(user_id.to_string()).or_default();
        if newly_credited {
            *total += points;
        }
        let total = *total;

        let articles_read = inner.credits.get(user_id).map_or(0, HashSet::len);

        Ok(json!({
            "points": total,
            "articlesRead": articles_read,
            "newlyCredited": newly_credited,
        }))
    }
}
