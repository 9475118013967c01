use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DWELL_FRACTION: f64 = 0.3;
pub const DEFAULT_DWELL_FLOOR_MS: u64 = 10_000;
pub const DEFAULT_DWELL_CEILING_MS: u64 = 300_000;

/// How long an article has to stay open before a credit decision may be asked for.
///
/// A fraction of the declared reading time, floored so short articles are not
/// instantly creditable, and capped so long ones do not demand every word.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DwellPolicy {
    pub fraction: f64,
    pub floor_ms: u64,
    pub ceiling_ms: u64,
}

impl Default for DwellPolicy {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_DWELL_FRACTION,
            floor_ms: DEFAULT_DWELL_FLOOR_MS,
            ceiling_ms: DEFAULT_DWELL_CEILING_MS,
        }
    }
}

impl DwellPolicy {
    pub fn min_dwell_ms(&self, reading_minutes: u32) -> u64 {
        let fraction = if self.fraction.is_finite() {
            self.fraction.max(0.0)
        } else {
            0.0
        };
        let scaled = (reading_minutes as f64 * 60_000.0 * fraction) as u64;

        // ceiling never undercuts the floor
        scaled.min(self.ceiling_ms.max(self.floor_ms)).max(self.floor_ms)
    }

    pub fn min_dwell(&self, reading_minutes: u32) -> Duration {
        Duration::from_millis(self.min_dwell_ms(reading_minutes))
    }
}
