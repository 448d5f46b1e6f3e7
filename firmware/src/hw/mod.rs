//! Adapters that connect the embassy runtime to the `node-core` collaborator
//! traits.
//!
//! The embassy time driver supplies the free-running tick register, and the
//! wake decision is turned into a [`SleepPlan`] that the node task awaits on.
//! The display and radio here are log-only stand-ins until the panel and BLE
//! drivers land.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

#[cfg(target_os = "none")]
pub mod sensor;

use embassy_time::TICK_HZ;
use node_core::display::{Display, Layout, Screen};
use node_core::node::Radio;
use node_core::scheduler::WakeControl;
use node_core::sensor::Reading;

use crate::{status, telemetry};

/// Embassy ticks per microsecond of virtual time.
pub const TICKS_PER_MICRO: u32 = ticks_per_micro(TICK_HZ);

const _: () = assert!(
    TICK_HZ >= 1_000_000 && TICK_HZ % 1_000_000 == 0,
    "the virtual clock needs a whole number of ticks per microsecond"
);

/// Ticks whose wrapped distance exceeds this are treated as already passed.
const PAST_WINDOW_TICKS: u32 = u32::MAX / 2;

const fn ticks_per_micro(tick_hz: u64) -> u32 {
    let per_micro = tick_hz / 1_000_000;
    if per_micro == 0 { 1 } else { low_word(per_micro) }
}

#[allow(clippy::cast_possible_truncation)]
const fn low_word(ticks: u64) -> u32 {
    (ticks & 0xFFFF_FFFF) as u32
}

/// Lower 32 bits of the embassy tick counter.
#[derive(Copy, Clone, Debug, Default)]
pub struct EmbassyTicks;

#[cfg(target_os = "none")]
impl node_core::clock::TickSource for EmbassyTicks {
    fn read_tick(&self) -> u32 {
        low_word(embassy_time::Instant::now().as_ticks())
    }
}

/// What the node task does between iterations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SleepPlan {
    /// Run the next iteration straight away.
    Yield,
    /// Sleep until the absolute embassy tick, or until the button moves.
    Until(u64),
    /// Sleep until the button moves.
    UntilInterrupt,
}

/// [`WakeControl`] that remembers the request for the node task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EmbassyWake {
    armed: Option<u32>,
    no_sleep: bool,
}

impl EmbassyWake {
    pub const fn new() -> Self {
        Self {
            armed: None,
            no_sleep: false,
        }
    }

    /// Consumes the pending request and resolves it against `now_ticks`.
    pub fn take_plan(&mut self, now_ticks: u64) -> SleepPlan {
        let no_sleep = core::mem::replace(&mut self.no_sleep, false);
        let armed = self.armed.take();
        if no_sleep {
            return SleepPlan::Yield;
        }
        match armed {
            None => SleepPlan::UntilInterrupt,
            Some(tick) => match deadline_ticks(now_ticks, tick) {
                Some(at) => SleepPlan::Until(at),
                None => SleepPlan::Yield,
            },
        }
    }
}

impl Default for EmbassyWake {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeControl for EmbassyWake {
    fn arm_wake_at(&mut self, tick: u32) {
        self.armed = Some(tick);
        self.no_sleep = false;
    }

    fn disable_wake(&mut self) {
        self.armed = None;
        self.no_sleep = false;
    }

    fn force_no_sleep_this_cycle(&mut self) {
        self.no_sleep = true;
    }
}

/// Extends a wrapped 32-bit target tick to the absolute 64-bit counter.
fn deadline_ticks(now_ticks: u64, target: u32) -> Option<u64> {
    let ahead = target.wrapping_sub(low_word(now_ticks));
    if ahead == 0 || ahead > PAST_WINDOW_TICKS {
        return None;
    }
    Some(now_ticks.saturating_add(u64::from(ahead)))
}

/// Panel stand-in that logs each composed screen.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogDisplay;

impl Display for LogDisplay {
    fn notify_new_reading(&mut self, _reading: Reading) {}

    fn request_refresh(&mut self, layout: Layout, screen: &Screen) {
        telemetry::emit_screen(layout, screen);
    }
}

/// Radio whose link state comes from the shared status flags.
#[derive(Copy, Clone, Debug, Default)]
pub struct StatusRadio;

impl Radio for StatusRadio {
    fn link_allows_notification(&self) -> bool {
        status::link_notify()
    }

    fn notify_new_reading(&mut self, reading: Reading) {
        status::record_reading(reading);
        telemetry::emit_notification(reading);
    }

    fn has_pending_traffic(&self) -> bool {
        status::radio_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_rate_rounds_down_to_whole_ticks() {
        assert_eq!(ticks_per_micro(1_000_000), 1);
        assert_eq!(ticks_per_micro(16_000_000), 16);
        assert_eq!(ticks_per_micro(32_768), 1);
    }

    #[test]
    fn wrapped_target_extends_past_the_low_word() {
        let now = 0x0000_0001_FFFF_FF00;
        assert_eq!(deadline_ticks(now, 0x0000_0100), Some(0x0000_0002_0000_0100));
        assert_eq!(deadline_ticks(now, 0xFFFF_FF80), Some(0x0000_0001_FFFF_FF80));
    }

    #[test]
    fn passed_or_current_target_yields() {
        let now = 5_000;
        assert_eq!(deadline_ticks(now, 5_000), None);
        assert_eq!(deadline_ticks(now, 4_999), None);
    }

    #[test]
    fn wake_requests_resolve_to_plans() {
        let mut wake = EmbassyWake::new();
        assert_eq!(wake.take_plan(0), SleepPlan::UntilInterrupt);

        wake.arm_wake_at(1_000);
        assert_eq!(wake.take_plan(10), SleepPlan::Until(1_000));
        assert_eq!(wake.take_plan(10), SleepPlan::UntilInterrupt);

        wake.arm_wake_at(1_000);
        wake.force_no_sleep_this_cycle();
        assert_eq!(wake.take_plan(10), SleepPlan::Yield);

        wake.disable_wake();
        assert_eq!(wake.take_plan(10), SleepPlan::UntilInterrupt);
    }

    #[test]
    fn status_radio_tracks_shared_flags() {
        let mut radio = StatusRadio;
        status::set_radio_pending(true);
        assert!(radio.has_pending_traffic());
        status::set_radio_pending(false);
        assert!(!radio.has_pending_traffic());

        radio.notify_new_reading(Reading::new(2_150, 4_000));
        assert_eq!(status::last_reading(), Some(Reading::new(2_150, 4_000)));
    }
}
