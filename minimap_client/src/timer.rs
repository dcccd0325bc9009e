//! Cooperative timers.
//!
//! Polled from the tick loop against a caller-supplied monotonic clock.
//! Nothing here sleeps or spawns, so a stopped timer simply never fires
//! again and a slow tick never produces a burst of catch-up fires.

use std::time::{Duration, Instant};

/// Whether a timer re-arms itself after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Once,
    Repeating,
}

#[derive(Debug, Clone)]
pub struct Timer {
    period: Duration,
    mode: TimerMode,
    next_fire: Option<Instant>,
}

impl Timer {
    pub fn repeating(period: Duration) -> Self {
        Self {
            period,
            mode: TimerMode::Repeating,
            next_fire: None,
        }
    }

    pub fn once(delay: Duration) -> Self {
        Self {
            period: delay,
            mode: TimerMode::Once,
            next_fire: None,
        }
    }

    /// Arms the timer; first fire one period from `now`.
    pub fn start(&mut self, now: Instant) {
        self.next_fire = Some(now + self.period);
    }

    /// Arms the timer so the next poll fires.
    pub fn start_now(&mut self, now: Instant) {
        self.next_fire = Some(now);
    }

    pub fn stop(&mut self) {
        self.next_fire = None;
    }

    /// Returns true when the timer is due, re-arming or stopping it.
    ///
    /// A repeating timer is re-armed relative to `now`, not to the missed
    /// deadline, so late polls fire once rather than once per missed period.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_fire {
            Some(at) if now >= at => {
                self.next_fire = match self.mode {
                    TimerMode::Repeating => Some(now + self.period),
                    TimerMode::Once => None,
                };
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_timer_never_fires() {
        let now = Instant::now();
        let mut t = Timer::repeating(Duration::from_millis(100));
        assert!(!t.poll(now + Duration::from_secs(10)));
    }

    #[test]
    fn repeating_fires_once_per_poll_without_backlog() {
        let t0 = Instant::now();
        let mut t = Timer::repeating(Duration::from_millis(100));
        t.start(t0);

        assert!(!t.poll(t0 + Duration::from_millis(50)));
        assert!(t.poll(t0 + Duration::from_millis(100)));
        // One second late: a single fire, then wait a full period again.
        let late = t0 + Duration::from_millis(1_100);
        assert!(t.poll(late));
        assert!(!t.poll(late));
        assert!(!t.poll(late + Duration::from_millis(99)));
        assert!(t.poll(late + Duration::from_millis(100)));
    }

    #[test]
    fn once_disarms_after_firing() {
        let t0 = Instant::now();
        let mut t = Timer::once(Duration::from_secs(2));
        t.start(t0);
        assert!(t.poll(t0 + Duration::from_secs(2)));
        assert!(!t.poll(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn start_now_fires_immediately_and_stop_cancels() {
        let t0 = Instant::now();
        let mut t = Timer::repeating(Duration::from_secs(1));
        t.start_now(t0);
        assert!(t.poll(t0));
        t.stop();
        assert!(!t.poll(t0 + Duration::from_secs(5)));
    }
}
