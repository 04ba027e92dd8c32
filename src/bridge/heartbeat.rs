//! Fixed-period liveness signal

use std::time::Duration;
use tokio::time::Instant;

/// A heartbeat that is due now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatEvent {
    /// Time since the previous fire (or since the scheduler started)
    pub since_last: Duration,
}

/// Emits at most one event per interval
///
/// On fire the reference point moves to the tick time, not to the ideal
/// boundary, so late ticks push every later heartbeat back.
#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    interval: Duration,
    last: Instant,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last: now,
        }
    }

    pub fn tick(&mut self, now: Instant) -> Option<HeartbeatEvent> {
        let since_last = now.saturating_duration_since(self.last);
        if since_last < self.interval {
            return None;
        }
        self.last = now;
        Some(HeartbeatEvent { since_last })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time left before the next heartbeat is due
    pub fn remaining(&self, now: Instant) -> Duration {
        self.interval
            .saturating_sub(now.saturating_duration_since(self.last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    #[test]
    fn test_does_not_fire_before_interval() {
        let start = Instant::now();
        let mut scheduler = HeartbeatScheduler::new(TEN_MINUTES, start);

        assert!(scheduler.tick(start).is_none());
        assert!(scheduler.tick(start + Duration::from_secs(599)).is_none());
        assert_eq!(
            scheduler.remaining(start + Duration::from_secs(599)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_fires_at_interval_and_resets() {
        let start = Instant::now();
        let mut scheduler = HeartbeatScheduler::new(TEN_MINUTES, start);

        let event = scheduler.tick(start + TEN_MINUTES).unwrap();
        assert_eq!(event.since_last, TEN_MINUTES);
        assert!(scheduler.tick(start + TEN_MINUTES).is_none());
    }

    #[test]
    fn test_late_tick_drifts() {
        let start = Instant::now();
        let mut scheduler = HeartbeatScheduler::new(TEN_MINUTES, start);

        // Fired 30 s late; the next one is due 10 min after that, not at 20 min
        let late = start + TEN_MINUTES + Duration::from_secs(30);
        assert!(scheduler.tick(late).is_some());
        assert!(scheduler.tick(start + 2 * TEN_MINUTES).is_none());
        assert!(scheduler.tick(late + TEN_MINUTES).is_some());
    }

    proptest! {
        #[test]
        fn fires_exactly_floor_when_ticks_hit_boundaries(
            interval_ms in 1u64..10_000,
            steps_per_interval in 1u64..20,
            intervals in 0u64..20,
        ) {
            // Step evenly divides the interval so ticks land on every boundary
            let interval = Duration::from_millis(interval_ms * steps_per_interval);
            let step = Duration::from_millis(interval_ms);
            let total_steps = steps_per_interval * intervals + (steps_per_interval - 1);

            let start = Instant::now();
            let mut scheduler = HeartbeatScheduler::new(interval, start);
            let fired = (1..=total_steps)
                .filter(|i| scheduler.tick(start + step * (*i as u32)).is_some())
                .count() as u64;

            prop_assert_eq!(fired, intervals);
        }

        #[test]
        fn never_fires_twice_within_an_interval(
            interval_ms in 1u64..5_000,
            offsets in proptest::collection::vec(0u64..2_000, 1..200),
        ) {
            let interval = Duration::from_millis(interval_ms);
            let start = Instant::now();
            let mut scheduler = HeartbeatScheduler::new(interval, start);

            let mut now = start;
            let mut last_fire = start;
            let mut fired = 0u64;
            for offset in offsets {
                now += Duration::from_millis(offset);
                if scheduler.tick(now).is_some() {
                    prop_assert!(now - last_fire >= interval);
                    last_fire = now;
                    fired += 1;
                }
            }

            let elapsed = (now - start).as_millis() as u64;
            prop_assert!(fired <= elapsed / interval_ms);
        }
    }
}
