//! # Reading Policy
//!
//! Heuristic gate deciding whether a finished reading session earns credit.
//! Raises the cost of scripts that fire "mark read" right away without adding
//! friction for people who scroll and linger.
//!
//! ## Checks, in order
//! 1. Metrics are physically plausible (depth in range, start not in the future, focus not longer than the session)
//! 2. Enough time passed since the token was issued, or since the client says it started, whichever is later
//! 3. Scroll depth above the floor
//! 4. Some scroll or pointer activity
//! 5. Focus covered a meaningful share of the elapsed time
//!
//! Token checks happen before any of this, in the service.

use payloads::{DwellPolicy, MetricsSnapshot, RejectReason};

use crate::session::ReadingSession;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingPolicy {
    pub dwell: DwellPolicy,
    /// Depth must be strictly above this.
    pub min_scroll_depth_percent: f64,
    pub min_focus_ratio: f64,
    pub clock_skew_ms: u64,
}

impl Default for ReadingPolicy {
    fn default() -> Self {
        Self {
            dwell: DwellPolicy::default(),
            min_scroll_depth_percent: 5.0,
            min_focus_ratio: 0.5,
            clock_skew_ms: 2_000,
        }
    }
}

impl ReadingPolicy {
    pub fn evaluate(
        &self,
        session: &ReadingSession,
        metrics: &MetricsSnapshot,
        now_ms: i64,
    ) -> Result<(), RejectReason> {
        let skew = i64::try_from(self.clock_skew_ms).unwrap_or(i64::MAX);

        let depth = metrics.scroll_depth_percent;
        if !depth.is_finite() || !(0.0..=100.0).contains(&depth) {
            return Err(RejectReason::InvalidMetrics);
        }

        if metrics.session_start_timestamp > now_ms.saturating_add(skew) {
            return Err(RejectReason::InvalidMetrics);
        }

        // a start so far back that the span overflows is not a real session
        let Some(claimed_ms) = now_ms.checked_sub(metrics.session_start_timestamp) else {
            return Err(RejectReason::InvalidMetrics);
        };
        let claimed_ms = claimed_ms.max(0) as u64;
        if metrics.cumulative_focus_duration_ms > claimed_ms.saturating_add(self.clock_skew_ms) {
            return Err(RejectReason::InvalidMetrics);
        }

        let started_ms = session.issued_at_ms.max(metrics.session_start_timestamp);
        let elapsed_ms = now_ms.saturating_sub(started_ms).max(0) as u64;
        if elapsed_ms < session.min_dwell_ms {
            return Err(RejectReason::TooFast);
        }

        if depth <= self.min_scroll_depth_percent {
            return Err(RejectReason::InsufficientScroll);
        }

        if metrics.scroll_event_count == 0 && metrics.pointer_movement_count == 0 {
            return Err(RejectReason::NoInteraction);
        }

        let required_focus_ms = elapsed_ms as f64 * self.min_focus_ratio;
        if (metrics.cumulative_focus_duration_ms as f64) < required_focus_ms {
            return Err(RejectReason::InsufficientFocus);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use payloads::{DwellPolicy, MetricsSnapshot, RejectReason};

    use super::ReadingPolicy;
    use crate::session::ReadingSession;

    const ISSUED: i64 = 1_700_000_000_000;
    const DWELL: u64 = 90_000;

    fn session() -> ReadingSession {
        ReadingSession {
            token_id: "t".to_string(),
            user_id: "u".to_string(),
            article_id: "a".to_string(),
            issued_at_ms: ISSUED,
            expires_at_ms: ISSUED + 7_200_000,
            min_dwell_ms: DWELL,
            fingerprint: None,
        }
    }

    fn honest(now_ms: i64) -> MetricsSnapshot {
        MetricsSnapshot {
            scroll_depth_percent: 80.0,
            scroll_event_count: 30,
            pointer_movement_count: 12,
            cumulative_focus_duration_ms: (now_ms - ISSUED) as u64,
            fingerprint: "f".to_string(),
            session_start_timestamp: ISSUED,
        }
    }

    fn policies() -> Vec<ReadingPolicy> {
        let mut policies = Vec::new();
        for min_scroll_depth_percent in [0.0, 5.0, 25.0] {
            for min_focus_ratio in [0.0, 0.5, 0.9] {
                policies.push(ReadingPolicy {
                    dwell: DwellPolicy::default(),
                    min_scroll_depth_percent,
                    min_focus_ratio,
                    clock_skew_ms: 2_000,
                });
            }
        }
        policies
    }

    #[test]
    fn test_honest_read_accepted() {
        let now = ISSUED + DWELL as i64 + 1_000;
        for policy in policies() {
            assert_eq!(policy.evaluate(&session(), &honest(now), now), Ok(()));
        }
    }

    #[test]
    fn test_below_dwell_always_rejected() {
        let now = ISSUED + DWELL as i64 - 1;
        for policy in policies() {
            assert_eq!(
                policy.evaluate(&session(), &honest(now), now),
                Err(RejectReason::TooFast)
            );
        }
    }

    #[test]
    fn test_late_client_start_shortens_elapsed() {
        let now = ISSUED + DWELL as i64 + 1_000;
        let mut metrics = honest(now);
        metrics.session_start_timestamp = ISSUED + 30_000;
        metrics.cumulative_focus_duration_ms = (now - metrics.session_start_timestamp) as u64;

        assert_eq!(
            ReadingPolicy::default().evaluate(&session(), &metrics, now),
            Err(RejectReason::TooFast)
        );
    }

    #[test]
    fn test_early_client_start_uses_issue_time() {
        let now = ISSUED + DWELL as i64 + 1_000;
        let mut metrics = honest(now);
        metrics.session_start_timestamp = ISSUED - 500;
        metrics.cumulative_focus_duration_ms = (now - metrics.session_start_timestamp) as u64;

        assert_eq!(ReadingPolicy::default().evaluate(&session(), &metrics, now), Ok(()));
    }

    #[test]
    fn test_passive_always_rejected() {
        let now = ISSUED + DWELL as i64 * 10;
        for policy in policies() {
            for depth in [0.0, 50.0, 100.0] {
                let mut metrics = honest(now);
                metrics.scroll_event_count = 0;
                metrics.pointer_movement_count = 0;
                metrics.scroll_depth_percent = depth;

                assert!(policy.evaluate(&session(), &metrics, now).is_err());
            }
        }
    }

    #[test]
    fn test_pointer_only_is_interaction() {
        let now = ISSUED + DWELL as i64 + 1_000;
        let mut metrics = honest(now);
        metrics.scroll_event_count = 0;

        assert_eq!(ReadingPolicy::default().evaluate(&session(), &metrics, now), Ok(()));

        metrics.pointer_movement_count = 0;
        assert_eq!(
            ReadingPolicy::default().evaluate(&session(), &metrics, now),
            Err(RejectReason::NoInteraction)
        );
    }

    #[test]
    fn test_scroll_floor_is_exclusive() {
        let now = ISSUED + DWELL as i64 + 1_000;
        for policy in policies() {
            let mut metrics = honest(now);
            metrics.scroll_depth_percent = policy.min_scroll_depth_percent;

            assert_eq!(
                policy.evaluate(&session(), &metrics, now),
                Err(RejectReason::InsufficientScroll)
            );
        }
    }

    #[test]
    fn test_background_tab_rejected() {
        let now = ISSUED + DWELL as i64 + 1_000;
        let elapsed = (now - ISSUED) as f64;

        for policy in policies().into_iter().filter(|p| p.min_focus_ratio > 0.0) {
            let mut metrics = honest(now);
            metrics.cumulative_focus_duration_ms = (elapsed * policy.min_focus_ratio) as u64 - 1;

            assert_eq!(
                policy.evaluate(&session(), &metrics, now),
                Err(RejectReason::InsufficientFocus)
            );
        }
    }

    #[test]
    fn test_implausible_metrics() {
        let now = ISSUED + DWELL as i64 + 1_000;
        let policy = ReadingPolicy::default();

        let mut metrics = honest(now);
        metrics.scroll_depth_percent = 140.0;
        assert_eq!(
            policy.evaluate(&session(), &metrics, now),
            Err(RejectReason::InvalidMetrics)
        );

        let mut metrics = honest(now);
        metrics.scroll_depth_percent = f64::NAN;
        assert_eq!(
            policy.evaluate(&session(), &metrics, now),
            Err(RejectReason::InvalidMetrics)
        );

        let mut metrics = honest(now);
        metrics.session_start_timestamp = now + 60_000;
        assert_eq!(
            policy.evaluate(&session(), &metrics, now),
            Err(RejectReason::InvalidMetrics)
        );

        let mut metrics = honest(now);
        metrics.cumulative_focus_duration_ms = (now - ISSUED) as u64 * 3;
        assert_eq!(
            policy.evaluate(&session(), &metrics, now),
            Err(RejectReason::InvalidMetrics)
        );
    }

    #[test]
    fn test_out_of_range_start() {
        let now = ISSUED + DWELL as i64 + 1_000;

        for start in [i64::MIN, i64::MAX] {
            let mut metrics = honest(now);
            metrics.session_start_timestamp = start;
            assert_eq!(
                ReadingPolicy::default().evaluate(&session(), &metrics, now),
                Err(RejectReason::InvalidMetrics)
            );

            // extreme settings still answer instead of overflowing
            let lenient = ReadingPolicy {
                clock_skew_ms: u64::MAX,
                ..ReadingPolicy::default()
            };
            metrics.cumulative_focus_duration_ms = u64::MAX;
            assert!(lenient.evaluate(&session(), &metrics, now).is_err());
        }
    }
}
