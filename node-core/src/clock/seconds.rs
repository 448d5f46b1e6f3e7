//! Monotonic elapsed-seconds bookkeeping on top of the virtual clock.

use super::{MICROS_PER_SECOND, VirtualTime};

/// Counts whole elapsed seconds using a trimmable step.
///
/// The step defaults to one second of virtual time. Nodes whose crystal runs
/// fast or slow can trim it so the counter tracks real seconds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SecondsCounter {
    seconds: u32,
    boundary: VirtualTime,
    step_us: u32,
}

impl SecondsCounter {
    /// Creates a counter at zero seconds anchored at `now`.
    #[must_use]
    pub const fn new(now: VirtualTime) -> Self {
        Self {
            seconds: 0,
            boundary: now,
            step_us: MICROS_PER_SECOND,
        }
    }

    /// Elapsed whole seconds.
    #[must_use]
    pub const fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Virtual time of the last recorded second boundary.
    #[must_use]
    pub const fn boundary(&self) -> VirtualTime {
        self.boundary
    }

    /// Current step length in microseconds.
    #[must_use]
    pub const fn step_us(&self) -> u32 {
        self.step_us
    }

    /// Replaces the step length. A zero step is ignored.
    pub fn set_step_us(&mut self, step_us: u32) {
        if step_us != 0 {
            self.step_us = step_us;
        }
    }

    /// Overrides the seconds value, keeping the current boundary.
    pub fn set_seconds(&mut self, seconds: u32) {
        self.seconds = seconds;
    }

    /// Advances the counter up to `now` and returns how many seconds were added.
    ///
    /// Runs zero or one times per call in steady state; only a long sleep makes
    /// it loop more.
    pub fn advance(&mut self, now: VirtualTime) -> u32 {
        let mut added = 0;
        while now.wrapping_sub(self.boundary) >= self.step_us {
            self.boundary = self.boundary.wrapping_add(self.step_us);
            self.seconds = self.seconds.wrapping_add(1);
            added += 1;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_once_per_step() {
        let mut counter = SecondsCounter::new(0);
        assert_eq!(counter.advance(999_999), 0);
        assert_eq!(counter.advance(1_000_000), 1);
        assert_eq!(counter.seconds(), 1);
        assert_eq!(counter.boundary(), 1_000_000);
    }

    #[test]
    fn catches_up_after_a_long_sleep_without_losing_the_remainder() {
        let mut counter = SecondsCounter::new(500);
        assert_eq!(counter.advance(3_600_000_400), 3_599);
        assert_eq!(counter.seconds(), 3_599);
        assert_eq!(counter.boundary(), 3_599_000_500);
        assert_eq!(counter.advance(3_600_000_500), 1);
    }

    #[test]
    fn trimmed_step_changes_the_rate() {
        let mut counter = SecondsCounter::new(0);
        counter.set_step_us(1_000_100);
        assert_eq!(counter.advance(10_000_000), 9);
        counter.set_step_us(0);
        assert_eq!(counter.step_us(), 1_000_100);
    }

    #[test]
    fn handles_virtual_time_wraparound() {
        let start = u32::MAX - 400_000;
        let mut counter = SecondsCounter::new(start);
        assert_eq!(counter.advance(start.wrapping_add(2_000_000)), 2);
    }
}
