use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub scroll_depth_percent: f64,
    pub scroll_event_count: u64,
    pub pointer_movement_count: u64,
    pub cumulative_focus_duration_ms: u64,
    pub fingerprint: String,
    pub session_start_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReadingRequest {
    pub article_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReadingResponse {
    pub read_token: String,
    pub min_dwell_ms: u64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReadRequest {
    pub article_id: String,
    pub metrics: MetricsSnapshot,
    pub read_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReadResponse {
    /// Whatever the points ledger reports back. Not interpreted here.
    pub progress: Value,
    pub fingerprint_matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    TokenUnknown,
    TokenConsumed,
    TokenExpired,
    TokenMismatch,
    InvalidMetrics,
    TooFast,
    InsufficientScroll,
    NoInteraction,
    InsufficientFocus,
}

impl RejectReason {
    /// Expected during normal navigation (double opens, stale tabs). Quiet on the client.
    pub fn is_precondition(self) -> bool {
        matches!(
            self,
            Self::TokenUnknown
                | Self::TokenConsumed
                | Self::TokenExpired
                | Self::TokenMismatch
                | Self::InvalidMetrics
        )
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::TokenUnknown => "token-unknown",
            Self::TokenConsumed => "token-consumed",
            Self::TokenExpired => "token-expired",
            Self::TokenMismatch => "token-mismatch",
            Self::InvalidMetrics => "invalid-metrics",
            Self::TooFast => "too-fast",
            Self::InsufficientScroll => "insufficient-scroll",
            Self::NoInteraction => "no-interaction",
            Self::InsufficientFocus => "insufficient-focus",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::TokenUnknown => "This reading session is not recognized",
            Self::TokenConsumed => "This reading session was already submitted",
            Self::TokenExpired => "This reading session has expired",
            Self::TokenMismatch => "This reading session belongs to a different article or user",
            Self::InvalidMetrics => "Reading activity could not be verified",
            Self::TooFast => "Keep reading a little longer before marking this article as read",
            Self::InsufficientScroll => "Scroll through the article before marking it as read",
            Self::NoInteraction => "No reading activity was detected",
            Self::InsufficientFocus => "The article was in the background for most of the session",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    AlreadyCredited,
    UnknownArticle,
    Unauthenticated,
    MalformedPayload,
    Rejected,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            message: reason.message().to_string(),
            code: ErrorCode::Rejected,
            reason: Some(reason),
        }
    }
}
