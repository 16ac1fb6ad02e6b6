//! Fixed-rate pacing for the playback thread.

use std::time::{Duration, Instant};

/// Remaining time below which [`TimeBarrier::wait`] spins instead of
/// sleeping.
const SPIN_WINDOW: Duration = Duration::from_micros(500);
/// Lateness, in periods, after which the schedule restarts from now.
const MAX_LAG_PERIODS: u32 = 4;

/// Releases the caller once per period on an absolute schedule, so jitter
/// in one wait does not accumulate into drift.
#[derive(Clone, Debug)]
pub struct TimeBarrier {
    period: Duration,
    next: Instant,
}

impl TimeBarrier {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    /// Barrier for `rate` releases per second.
    pub fn from_rate(rate: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / rate.max(1.0)))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Restart the schedule one period from now.
    pub fn reset(&mut self) {
        self.next = Instant::now() + self.period;
    }

    /// Block until the next deadline and return how late the release was.
    pub fn wait(&mut self) -> Duration {
        let mut now = Instant::now();
        while now < self.next {
            let left = self.next - now;
            if left > SPIN_WINDOW {
                std::thread::sleep(left - SPIN_WINDOW);
            } else {
                std::hint::spin_loop();
            }
            now = Instant::now();
        }
        let late = now - self.next;
        self.next += self.period;
        if late > self.period * MAX_LAG_PERIODS {
            tracing::trace!(late_us = late.as_micros() as u64, "playback fell behind");
            self.next = now + self.period;
        }
        late
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_on_schedule() {
        let mut barrier = TimeBarrier::new(Duration::from_millis(2));
        let start = Instant::now();
        for _ in 0..5 {
            barrier.wait();
        }
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn from_rate_sets_period() {
        let barrier = TimeBarrier::from_rate(250.0);
        assert_eq!(barrier.period(), Duration::from_millis(4));
    }

    #[test]
    fn resyncs_after_a_stall() {
        let mut barrier = TimeBarrier::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(barrier.wait() >= Duration::from_millis(10));
        // the next deadline is a full period away again
        let start = Instant::now();
        barrier.wait();
        assert!(start.elapsed() >= Duration::from_micros(500));
    }
}
