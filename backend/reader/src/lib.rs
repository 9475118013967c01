//! Reader side of the reading-credit flow.
//!
//! The host (browser shell, native reader, simulator) publishes scroll, pointer and focus
//! events on an [`EventBus`]. The [`Gatekeeper`] owns one reading attempt at a time and
//! talks to the server through a [`ReadingApi`].
//!
//! ```text
//!   host events ──► EventBus ──► Collector ──► MetricsSnapshot
//!                                                   │
//!   open/close ───► Gatekeeper ── start / submit ───┴──► ReadingApi ──► server
//!                       │
//!                       └──► GatekeeperEvent (credited, rejected, skipped, ...)
//! ```
pub mod clock;
pub mod collector;
pub mod fingerprint;
pub mod gatekeeper;
pub mod remote;

pub use clock::TokioClock;
pub use collector::{Collector, EventBus, ReaderEvent, TimedEvent};
pub use fingerprint::{EnvironmentSignals, generate};
pub use gatekeeper::{
    ApiError, ArticleRef, Gatekeeper, GatekeeperConfig, GatekeeperEvent, ReadingApi, SkipCause,
};
pub use remote::HttpReadingApi;
