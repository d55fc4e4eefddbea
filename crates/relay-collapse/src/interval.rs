use std::time::Duration;

const SCALE_DOWN_FACTOR: f64 = 0.85;
const MIN_FLOOR: Duration = Duration::from_millis(700);

/// Tracks playlist refresh outcomes to pick the next poll interval.
///
/// Mirrors the shape of an adaptive-refresh tracker (recent-result
/// history, `min`/`max` clamping) but the scaling direction here follows
/// the collapser's own rule: polling speeds up by a fixed factor after
/// every empty refresh, down to a 700ms floor, and resets to the
/// baseline the moment new segments show up.
pub struct PollIntervalTracker {
    base: Duration,
    current: Duration,
}

impl PollIntervalTracker {
    /// `min_poll` and `target_duration` together determine the baseline
    /// interval: `max(min_poll, target_duration * 0.5)`.
    pub fn new(min_poll: Duration, target_duration: Duration) -> Self {
        let base = min_poll.max(target_duration.mul_f64(0.5));
        Self { base, current: base }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn record_new_segments(&mut self, count: usize) {
        if count > 0 {
            self.current = self.base;
        } else {
            let scaled = self.current.mul_f64(SCALE_DOWN_FACTOR);
            self.current = scaled.max(MIN_FLOOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_is_max_of_min_poll_and_half_target_duration() {
        let tracker = PollIntervalTracker::new(Duration::from_millis(500), Duration::from_secs(6));
        assert_eq!(tracker.current(), Duration::from_secs(3));
    }

    #[test]
    fn test_min_poll_wins_when_target_duration_is_small() {
        let tracker = PollIntervalTracker::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(tracker.current(), Duration::from_secs(2));
    }

    #[test]
    fn test_empty_refresh_scales_down_toward_floor() {
        let mut tracker = PollIntervalTracker::new(Duration::from_millis(700), Duration::from_secs(10));
        assert_eq!(tracker.current(), Duration::from_secs(5));
        for _ in 0..60 {
            tracker.record_new_segments(0);
        }
        assert_eq!(tracker.current(), MIN_FLOOR);
    }

    #[test]
    fn test_new_segments_reset_interval_to_baseline() {
        let mut tracker = PollIntervalTracker::new(Duration::from_millis(700), Duration::from_secs(10));
        tracker.record_new_segments(0);
        assert!(tracker.current() < Duration::from_secs(5));
        tracker.record_new_segments(2);
        assert_eq!(tracker.current(), Duration::from_secs(5));
    }
}
