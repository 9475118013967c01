use serde::{Deserialize, Serialize};

/// What a read token stands for. Stored under the token id until consumed or expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingSession {
    pub token_id: String,
    pub user_id: String,
    pub article_id: String,
    pub issued_at_ms: i64,
    pub expires_at_ms: i64,
    pub min_dwell_ms: u64,
    pub fingerprint: Option<String>,
}

impl ReadingSession {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }

    pub fn belongs_to(&self, user_id: &str, article_id: &str) -> bool {
        self.user_id == user_id && self.article_id == article_id
    }
}

/// Result of trying to consume a token id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumption {
    Live(ReadingSession),
    Consumed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub min_dwell_ms: u64,
    pub expires_at_ms: i64,
}
