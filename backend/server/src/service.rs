//! # Session Token Service
//!
//! Sole authority over read tokens.
//!
//! - `issue` is the only place "has this user already read this article" is checked before tracking starts
//! - `validate` burns the token on the first attempt, accepted or not, so a rejected token can't be retried
//! - `submit` is `validate` plus handing an accepted read to the credit ledger
use std::{sync::Arc, time::Duration};

use payloads::{Clock, MetricsSnapshot, RejectReason};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    policy::ReadingPolicy,
    session::{Consumption, IssuedToken, ReadingSession},
    store::{CreditLedger, SessionStore, StoreError},
    tokens::TokenCodec,
};

#[derive(Error, Debug)]
pub enum IssueError {
    #[error("Article already credited")]
    AlreadyCredited,

    #[error("Unknown article")]
    UnknownArticle,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accepted { fingerprint_matched: bool },
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Credited {
        progress: Value,
        fingerprint_matched: bool,
    },
    Rejected(RejectReason),
}

pub struct ServiceSettings {
    pub policy: ReadingPolicy,
    pub token_ttl: Duration,
    pub points_per_read: u64,
}

pub struct ReadingService {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn CreditLedger>,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    settings: ServiceSettings,
}

impl ReadingService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn CreditLedger>,
        codec: TokenCodec,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            sessions,
            ledger,
            codec,
            clock,
            settings,
        }
    }

    pub async fn issue(
        &self,
        user_id: &str,
        article_id: &str,
        fingerprint: Option<String>,
    ) -> Result<IssuedToken, IssueError> {
        if self.ledger.is_credited(user_id, article_id).await? {
            return Err(IssueError::AlreadyCredited);
        }

        let Some(reading_minutes) = self.ledger.reading_minutes(article_id).await? else {
            return Err(IssueError::UnknownArticle);
        };

        let now_ms = self.clock.now_ms();
        let ttl_ms = i64::try_from(self.settings.token_ttl.as_millis()).unwrap_or(i64::MAX);
        let min_dwell_ms = self.settings.policy.dwell.min_dwell_ms(reading_minutes);
        let (token_id, token) = self.codec.mint();

        let session = ReadingSession {
            token_id,
            user_id: user_id.to_string(),
            article_id: article_id.to_string(),
            issued_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
            min_dwell_ms,
            fingerprint: fingerprint.filter(|f| !f.is_empty()),
        };

        self.sessions.put(&session, self.settings.token_ttl).await?;

        info!("Issued read token for user {user_id} article {article_id}, dwell {min_dwell_ms}ms");

        Ok(IssuedToken {
            token,
            min_dwell_ms,
            expires_at_ms: session.expires_at_ms,
        })
    }

    pub async fn validate(
        &self,
        user_id: &str,
        article_id: &str,
        token: &str,
        metrics: &MetricsSnapshot,
    ) -> Result<Decision, StoreError> {
        let Some(token_id) = self.codec.open(token) else {
            warn!("Unsigned read token from user {user_id}");
            return Ok(Decision::Rejected(RejectReason::TokenUnknown));
        };

        let session = match self.sessions.take(&token_id).await? {
            Consumption::Live(session) => session,
            Consumption::Consumed => {
                warn!("Replayed read token from user {user_id} article {article_id}");
                return Ok(Decision::Rejected(RejectReason::TokenConsumed));
            }
            Consumption::Unknown => return Ok(Decision::Rejected(RejectReason::TokenUnknown)),
        };

        let now_ms = self.clock.now_ms();

        if session.is_expired(now_ms) {
            return Ok(Decision::Rejected(RejectReason::TokenExpired));
        }

        if !session.belongs_to(user_id, article_id) {
            warn!(
                "Read token for user {} article {} submitted by user {user_id} for article {article_id}",
                session.user_id, session.article_id
            );
            return Ok(Decision::Rejected(RejectReason::TokenMismatch));
        }

        let fingerprint_matched = session
            .fingerprint
            .as_deref()
            .is_none_or(|issued| issued == metrics.fingerprint);
        if !fingerprint_matched {
            warn!("Fingerprint changed mid-session for user {user_id} article {article_id}");
        }

        match self.settings.policy.evaluate(&session, metrics, now_ms) {
            Ok(()) => Ok(Decision::Accepted {
                fingerprint_matched,
            }),
            Err(reason) => {
                info!("Rejected read for user {user_id} article {article_id}: {reason}");
                Ok(Decision::Rejected(reason))
            }
        }
    }

    pub async fn submit(
        &self,
        user_id: &str,
        article_id: &str,
        token: &str,
        metrics: &MetricsSnapshot,
    ) -> Result<SubmitOutcome, StoreError> {
        match self.validate(user_id, article_id, token, metrics).await? {
            Decision::Accepted {
                fingerprint_matched,
            } => {
                let progress = self
                    .ledger
                    .grant(user_id, article_id, self.settings.points_per_read)
                    .await?;

                info!("Credited user {user_id} for article {article_id}");

                Ok(SubmitOutcome::Credited {
                    progress,
                    fingerprint_matched,
                })
            }
            Decision::Rejected(reason) => Ok(SubmitOutcome::Rejected(reason)),
        }
    }
}
