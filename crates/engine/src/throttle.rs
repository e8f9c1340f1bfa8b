use std::time::{Duration, Instant};

/// Minimum-interval debounce for incremental log forwarding.
///
/// Updates arriving inside the interval are dropped, not queued; the
/// caller sends the most recent snapshot whenever `should_emit`
/// returns true. The terminal update of a job bypasses the throttle
/// entirely so completion is never withheld.
pub struct LogThrottler {
    min_interval: Duration,
    last_emit: Option<Instant>,
}

impl LogThrottler {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
        }
    }

    pub fn should_emit(&self, now: Instant) -> bool {
        match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_emit = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_always_emits() {
        let throttler = LogThrottler::new(Duration::from_secs(3));
        assert!(throttler.should_emit(Instant::now()));
    }

    #[test]
    fn updates_inside_interval_are_dropped() {
        let start = Instant::now();
        let mut throttler = LogThrottler::new(Duration::from_secs(3));
        throttler.record(start);
        assert!(!throttler.should_emit(start + Duration::from_millis(500)));
        assert!(!throttler.should_emit(start + Duration::from_millis(2999)));
    }

    #[test]
    fn interval_boundary_emits() {
        let start = Instant::now();
        let mut throttler = LogThrottler::new(Duration::from_secs(3));
        throttler.record(start);
        assert!(throttler.should_emit(start + Duration::from_secs(3)));
    }

    /// A job updating every 0.5 s for 10 s against a 3 s throttle
    /// produces 4 intermediate emissions (at 0.5, 3.5, 6.5, 9.5 s).
    #[test]
    fn half_second_updates_over_ten_seconds() {
        let start = Instant::now();
        let mut throttler = LogThrottler::new(Duration::from_secs(3));

        let mut emitted = 0;
        for step in 1..=20 {
            let now = start + Duration::from_millis(500 * step);
            if throttler.should_emit(now) {
                throttler.record(now);
                emitted += 1;
            }
        }
        assert_eq!(emitted, 4);
    }
}
