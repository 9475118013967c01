use payloads::{Clock, SystemClock};
use tokio::time::Instant;

/// Wall-clock epoch captured once, advanced by tokio's monotonic clock.
///
/// Follows paused/advanced time in tokio tests, and never jumps with NTP corrections.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_ms: i64,
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_ms())
    }

    pub fn starting_at(origin_ms: i64) -> Self {
        Self {
            origin_ms,
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }
}
