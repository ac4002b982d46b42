use std::time::{Duration, Instant};

/// Progress values at or above this are reported as exactly complete.
const COMPLETE_THRESHOLD: f64 = 0.999_99;

/// Rate limiter for high-frequency transport progress callbacks.
///
/// A tick passes only when strictly more than `interval` has elapsed on the
/// monotonic clock since the last tick that passed.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Instant,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// Returns `true` if a tick should be forwarded now.
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    /// Same as [`ready`](Self::ready) with an explicit clock reading.
    pub fn ready_at(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) > self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

/// Monotonic floor for a progress fraction.
///
/// Once a value has been reported, later reports never go below it until
/// [`reset`](Self::reset). Values within floating-point slack of 1 snap to 1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressFloor {
    floor: f64,
}

impl ProgressFloor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamps `value` against the floor and raises the floor to the result.
    pub fn apply(&mut self, value: f64) -> f64 {
        let value = if value >= COMPLETE_THRESHOLD { 1.0 } else { value };
        let value = value.max(self.floor);
        self.floor = value;
        value
    }

    pub fn reset(&mut self) {
        self.floor = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_blocks_within_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(100));
        let start = throttle.last;

        assert!(!throttle.ready_at(start + Duration::from_millis(50)));
        assert!(!throttle.ready_at(start + Duration::from_millis(100)));
        assert!(throttle.ready_at(start + Duration::from_millis(101)));
        // Window restarts from the forwarded tick.
        assert!(!throttle.ready_at(start + Duration::from_millis(150)));
        assert!(throttle.ready_at(start + Duration::from_millis(250)));
    }

    #[test]
    fn throttle_zero_interval_passes_any_later_tick() {
        let mut throttle = ProgressThrottle::new(Duration::ZERO);
        let start = throttle.last;
        assert!(!throttle.ready_at(start));
        assert!(throttle.ready_at(start + Duration::from_nanos(1)));
    }

    #[test]
    fn floor_never_decreases() {
        let mut floor = ProgressFloor::new();
        assert_eq!(floor.apply(0.4), 0.4);
        assert_eq!(floor.apply(0.2), 0.4);
        assert_eq!(floor.apply(0.6), 0.6);
        assert_eq!(floor.apply(0.6), 0.6);
    }

    #[test]
    fn floor_snaps_near_one() {
        let mut floor = ProgressFloor::new();
        assert_eq!(floor.apply(0.999_995), 1.0);
        assert_eq!(floor.apply(0.5), 1.0);
    }

    #[test]
    fn floor_reset() {
        let mut floor = ProgressFloor::new();
        floor.apply(0.7);
        floor.reset();
        assert_eq!(floor.apply(0.1), 0.1);
    }
}
