//! Debounced push-button handling.
//!
//! The button is sampled once per loop iteration. Level changes are confirmed
//! after [`DEBOUNCE_US`]; confirmed presses are grouped into one
//! [`ButtonEvent`] once [`LONG_PRESS_US`] has passed since the last of them.
//! Both waits are deadlines on the [`Scheduler`], so a bouncing contact keeps
//! the node awake only for as long as it bounces.

use crate::clock::{TickSource, VirtualTime};
use crate::scheduler::Scheduler;

/// Time a level must stay stable before it counts.
pub const DEBOUNCE_US: u32 = 50_000;
/// Quiet time after the last press before the clicks are reported.
pub const LONG_PRESS_US: u32 = 500_000;

/// Raw button level.
pub trait ButtonInput {
    fn is_pressed(&self) -> bool;
}

/// Debouncer state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ButtonState {
    Released,
    Debouncing { until: VirtualTime },
    Pressed,
}

/// A group of clicks, reported once the button has been quiet long enough.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ButtonEvent {
    pub clicks: u8,
    /// The button was still held when the event was reported.
    pub long_press: bool,
}

#[derive(Debug)]
pub struct ButtonDebouncer {
    state: ButtonState,
    level: bool,
    clicks: u8,
    report_at: Option<VirtualTime>,
}

impl ButtonDebouncer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ButtonState::Released,
            level: false,
            clicks: 0,
            report_at: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ButtonState {
        self.state
    }

    /// Clicks confirmed but not reported yet.
    #[must_use]
    pub const fn pending_clicks(&self) -> u8 {
        self.clicks
    }

    /// Feeds the current level; returns an event when a click group completes.
    pub fn handle<S>(&mut self, pressed: bool, scheduler: &mut Scheduler<S>) -> Option<ButtonEvent>
    where
        S: TickSource,
    {
        if pressed != self.level {
            self.level = pressed;
            let until = scheduler.request_wake_after(DEBOUNCE_US);
            self.state = ButtonState::Debouncing { until };
        }

        if let ButtonState::Debouncing { until } = self.state
            && scheduler.should_wake(until)
        {
            if pressed {
                self.state = ButtonState::Pressed;
                self.clicks = self.clicks.saturating_add(1);
                self.report_at = Some(scheduler.request_wake_after(LONG_PRESS_US));
            } else {
                self.state = ButtonState::Released;
            }
        }

        let report_at = self.report_at?;
        if self.clicks == 0 || !scheduler.should_wake(report_at) {
            return None;
        }

        self.report_at = None;
        let event = ButtonEvent {
            clicks: self.clicks,
            long_press: self.state == ButtonState::Pressed,
        };
        self.clicks = 0;
        Some(event)
    }
}

impl Default for ButtonDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualTickSource, VirtualClock};

    struct Bench<'a> {
        ticks: &'a ManualTickSource,
        scheduler: Scheduler<&'a ManualTickSource>,
        button: ButtonDebouncer,
    }

    impl<'a> Bench<'a> {
        fn new(ticks: &'a ManualTickSource) -> Self {
            Self {
                ticks,
                scheduler: Scheduler::new(VirtualClock::new(ticks, 1)),
                button: ButtonDebouncer::new(),
            }
        }

        fn sample(&mut self, at_us: u32, pressed: bool) -> Option<ButtonEvent> {
            self.ticks.set(at_us);
            self.scheduler.begin_iteration();
            self.button.handle(pressed, &mut self.scheduler)
        }
    }

    #[test]
    fn short_click_is_reported_after_the_quiet_time() {
        let ticks = ManualTickSource::new(0);
        let mut bench = Bench::new(&ticks);

        assert_eq!(bench.sample(0, true), None);
        assert_eq!(bench.scheduler.wake_budget(), Some(DEBOUNCE_US));
        assert_eq!(bench.sample(50_000, true), None);
        assert_eq!(bench.button.state(), ButtonState::Pressed);
        assert_eq!(bench.button.pending_clicks(), 1);

        assert_eq!(bench.sample(120_000, false), None);
        assert_eq!(bench.sample(170_000, false), None);
        assert_eq!(bench.button.state(), ButtonState::Released);

        assert_eq!(
            bench.sample(550_000, false),
            Some(ButtonEvent {
                clicks: 1,
                long_press: false
            })
        );
        assert_eq!(bench.button.pending_clicks(), 0);
    }

    #[test]
    fn held_button_reports_a_long_press() {
        let ticks = ManualTickSource::new(0);
        let mut bench = Bench::new(&ticks);

        bench.sample(0, true);
        bench.sample(50_000, true);
        assert_eq!(bench.sample(300_000, true), None);
        assert_eq!(
            bench.sample(550_000, true),
            Some(ButtonEvent {
                clicks: 1,
                long_press: true
            })
        );
    }

    #[test]
    fn presses_inside_the_quiet_time_are_grouped() {
        let ticks = ManualTickSource::new(0);
        let mut bench = Bench::new(&ticks);

        bench.sample(0, true);
        bench.sample(50_000, true);
        bench.sample(100_000, false);
        bench.sample(150_000, false);
        bench.sample(200_000, true);
        bench.sample(250_000, true);
        assert_eq!(bench.button.pending_clicks(), 2);
        bench.sample(300_000, false);
        bench.sample(350_000, false);

        assert_eq!(bench.sample(700_000, false), None);
        assert_eq!(
            bench.sample(750_000, false),
            Some(ButtonEvent {
                clicks: 2,
                long_press: false
            })
        );
    }

    #[test]
    fn bounce_shorter_than_the_debounce_time_is_ignored() {
        let ticks = ManualTickSource::new(0);
        let mut bench = Bench::new(&ticks);

        bench.sample(0, true);
        bench.sample(10_000, false);
        bench.sample(60_000, false);

        assert_eq!(bench.button.state(), ButtonState::Released);
        assert_eq!(bench.button.pending_clicks(), 0);
        assert_eq!(bench.scheduler.wake_budget(), None);
    }
}
