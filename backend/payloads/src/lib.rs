//! # Reading Payloads
//!
//! Shared contract between the reader client and the reading server.
//!
//! ## Overall Payloads
//!
//! Responses/requests between the client and backend. All JSON, camelCase fields.
//!
//! ### Identity
//! Headers
//! - x-user-id: acting user, set by the gateway after authentication. Never trusted from anywhere else.
//!
//! ### Start Reading
//! To backend
//! - article id, optional device fingerprint hint
//!
//! From backend
//! - single-use read token, the minimum dwell the server will enforce, token expiry (epoch ms)
//! - 409 if the user already holds credit for the article
//!
//! ### Submit Read
//! To backend
//! - article id, final metrics snapshot, read token
//!
//! From backend
//! - opaque progress blob from the points ledger + whether the fingerprint matched the one bound at issue
//! - otherwise an [`ErrorBody`] with a human message and a machine [`RejectReason`]
//!
//!
//!
//! ## Flow
//!
//! - Client opens an article, starts collecting signals right away
//! - Client asks for a token, server checks credit and binds (user, article, issued at, fingerprint)
//! - Client waits out the dwell, then submits the snapshot with the token
//! - Token is burned on the first submit no matter the outcome
//! - Replays, forged tokens, or other users' tokens never earn credit

pub mod clock;
pub mod dwell;
pub mod reading;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dwell::DwellPolicy;
pub use reading::{
    ErrorBody, ErrorCode, MetricsSnapshot, RejectReason, StartReadingRequest,
    StartReadingResponse, SubmitReadRequest, SubmitReadResponse,
};

pub const USER_HEADER: &str = "x-user-id";
pub const START_READING_PATH: &str = "/reading/start";
pub const SUBMIT_READ_PATH: &str = "/reading/submit";
