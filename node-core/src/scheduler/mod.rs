//! Per-iteration deadline coalescing and the sleep decision.
//!
//! Every periodic subsystem expresses its timing needs as "do not let me sleep
//! past T". The [`Scheduler`] folds those requests into a single wake budget
//! for the current loop iteration and, once the iteration is done, programs
//! the one hardware wake source accordingly. Nothing is remembered between
//! iterations: a subsystem that still cares about a deadline registers it
//! again on the next pass, and forgetting to do so is how a wake is cancelled.

use core::fmt;

use crate::clock::{TickSource, VirtualClock, VirtualTime, is_pending};

/// Longest sleep the wake source is ever asked for (one hour). A deadline up
/// to this far behind the current time counts as already due.
pub const MAX_HORIZON_US: u32 = 3_600 * 1_000_000;

/// Furthest a deadline can lie ahead and still read as in the future. The rest
/// of the 32-bit range is the past window above.
pub const LOOKAHEAD_US: u32 = u32::MAX - MAX_HORIZON_US;

/// Budget left over after the loop that is too small to be worth suspending for.
pub const SLEEP_ENTRY_MARGIN_US: u32 = 128;

/// Programs the event that ends the processor's low-power state.
pub trait WakeControl {
    /// Arms the wake timer to fire when the tick register reaches `tick`.
    fn arm_wake_at(&mut self, tick: u32);

    /// Disables the wake timer; only external interrupts end the sleep.
    fn disable_wake(&mut self);

    /// Skips suspension for this iteration and runs the next one immediately.
    fn force_no_sleep_this_cycle(&mut self);
}

/// Wake control that records the last decision, used by tests and the emulator.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RecordingWakeControl {
    last: Option<WakeCommand>,
}

/// Command issued to a [`WakeControl`] implementation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WakeCommand {
    ArmAt(u32),
    Disable,
    NoSleep,
}

impl RecordingWakeControl {
    /// Creates a recorder with no command seen yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Returns and clears the last command.
    pub fn take(&mut self) -> Option<WakeCommand> {
        self.last.take()
    }

    /// Returns the last command without clearing it.
    #[must_use]
    pub const fn last(&self) -> Option<WakeCommand> {
        self.last
    }
}

impl WakeControl for RecordingWakeControl {
    fn arm_wake_at(&mut self, tick: u32) {
        self.last = Some(WakeCommand::ArmAt(tick));
    }

    fn disable_wake(&mut self) {
        self.last = Some(WakeCommand::Disable);
    }

    fn force_no_sleep_this_cycle(&mut self) {
        self.last = Some(WakeCommand::NoSleep);
    }
}

/// Returns `true` once `deadline` has been reached, or passed by at most
/// [`MAX_HORIZON_US`].
///
/// This is the single rule both the coalescer and [`Scheduler::should_wake`]
/// use to tell a past deadline from a future one.
#[must_use]
pub const fn is_due(now: VirtualTime, deadline: VirtualTime) -> bool {
    !is_pending(now, deadline, LOOKAHEAD_US + 1)
}

/// Steps a periodic deadline by one `interval`, then drops every further
/// period that already lies entirely behind `now`.
///
/// Returns the new deadline and the number of periods dropped. The result may
/// still be due, by less than one interval; the grid phase is always kept.
#[must_use]
pub const fn advance_cadence(
    deadline: VirtualTime,
    interval: u32,
    now: VirtualTime,
) -> (VirtualTime, u32) {
    let next = deadline.wrapping_add(interval);
    let behind = now.wrapping_sub(next);
    if interval == 0 || behind > MAX_HORIZON_US || behind < interval {
        return (next, 0);
    }
    let skipped = behind / interval;
    (next.wrapping_add(skipped * interval), skipped)
}

/// Outcome of [`Scheduler::commit_sleep_decision`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SleepDecision {
    /// No deadline was registered; sleep until an external interrupt.
    Indefinite,
    /// A deadline is imminent or already missed; do not suspend.
    NoSleep { budget_us: u32, loop_us: u32 },
    /// Wake source armed `sleep_us` from now, at raw tick `tick`.
    WakeAt { tick: u32, sleep_us: u32 },
}

impl SleepDecision {
    /// Returns `true` when the processor is allowed to suspend.
    #[must_use]
    pub const fn suspends(self) -> bool {
        !matches!(self, SleepDecision::NoSleep { .. })
    }
}

impl fmt::Display for SleepDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepDecision::Indefinite => f.write_str("sleep indefinitely"),
            SleepDecision::NoSleep { budget_us, loop_us } => {
                write!(f, "no sleep (budget {budget_us}us, loop {loop_us}us)")
            }
            SleepDecision::WakeAt { tick, sleep_us } => {
                write!(f, "sleep {sleep_us}us (tick {tick:#010x})")
            }
        }
    }
}

/// Wake-scheduling state: the virtual clock plus the per-iteration budget.
#[derive(Debug)]
pub struct Scheduler<S> {
    clock: VirtualClock<S>,
    loop_epoch: VirtualTime,
    wake_budget: Option<u32>,
}

impl<S> Scheduler<S>
where
    S: TickSource,
{
    /// Creates a scheduler over `clock` with an unbounded budget.
    #[must_use]
    pub fn new(mut clock: VirtualClock<S>) -> Self {
        let loop_epoch = clock.now();
        Self {
            clock,
            loop_epoch,
            wake_budget: None,
        }
    }

    /// Samples the virtual clock.
    pub fn now(&mut self) -> VirtualTime {
        self.clock.now()
    }

    /// Borrows the virtual clock.
    #[must_use]
    pub const fn clock(&self) -> &VirtualClock<S> {
        &self.clock
    }

    /// Virtual time captured at the start of the current iteration.
    #[must_use]
    pub const fn loop_epoch(&self) -> VirtualTime {
        self.loop_epoch
    }

    /// Smallest registered `deadline - epoch` so far, or `None` when unbounded.
    #[must_use]
    pub const fn wake_budget(&self) -> Option<u32> {
        self.wake_budget
    }

    /// Starts a new iteration: captures the epoch and forgets every request.
    pub fn begin_iteration(&mut self) -> VirtualTime {
        self.loop_epoch = self.clock.now();
        self.wake_budget = None;
        self.loop_epoch
    }

    /// Ensures the next sleep does not extend past `deadline`; returns `deadline`.
    ///
    /// Deadlines the epoch has reached, or passed by up to [`MAX_HORIZON_US`],
    /// count as already due and collapse the budget to zero.
    pub fn request_wake_no_later_than(&mut self, deadline: VirtualTime) -> VirtualTime {
        let delta = if is_due(self.loop_epoch, deadline) {
            0
        } else {
            deadline.wrapping_sub(self.loop_epoch).min(MAX_HORIZON_US)
        };

        if self.wake_budget.is_none_or(|budget| delta < budget) {
            self.wake_budget = Some(delta);
        }
        deadline
    }

    /// Registers a deadline `micros` from now; returns that deadline.
    pub fn request_wake_after(&mut self, micros: u32) -> VirtualTime {
        let deadline = self.clock.now().wrapping_add(micros);
        self.request_wake_no_later_than(deadline)
    }

    /// Returns `true` once `deadline` is reached; otherwise keeps it registered.
    pub fn should_wake(&mut self, deadline: VirtualTime) -> bool {
        let now = self.clock.now();
        if is_due(now, deadline) {
            true
        } else {
            self.request_wake_no_later_than(deadline);
            false
        }
    }

    /// Programs `wake` from the accumulated budget. Call once, last, per iteration.
    pub fn commit_sleep_decision<W>(&mut self, wake: &mut W) -> SleepDecision
    where
        W: WakeControl,
    {
        let Some(budget_us) = self.wake_budget else {
            wake.disable_wake();
            return SleepDecision::Indefinite;
        };

        let loop_us = self.clock.now().wrapping_sub(self.loop_epoch);
        if budget_us <= loop_us.saturating_add(SLEEP_ENTRY_MARGIN_US) {
            wake.force_no_sleep_this_cycle();
            return SleepDecision::NoSleep { budget_us, loop_us };
        }

        let sleep_us = (budget_us - loop_us).min(self.clock.max_sleep_us());
        let tick = self
            .clock
            .current_tick()
            .wrapping_add(self.clock.micros_to_ticks(sleep_us));
        wake.arm_wake_at(tick);
        SleepDecision::WakeAt { tick, sleep_us }
    }
}
