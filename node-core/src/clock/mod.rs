//! Microsecond virtual clock layered over a wrapping hardware tick counter.
//!
//! The hardware timer on the node runs at a fixed multiple of 1 MHz and wraps
//! after a few minutes. [`VirtualClock`] turns successive samples of that
//! register into a microsecond count whose horizon comfortably exceeds the
//! longest deadline the node ever registers.
//!
//! The clock is only correct when it is sampled at least once per hardware
//! wrap period. The main loop upholds that by sampling on every iteration and
//! never sleeping longer than [`VirtualClock::max_sleep_us`]. Nothing here can
//! detect a violation after the fact.

use core::cell::Cell;

pub mod seconds;

pub use seconds::SecondsCounter;

/// Microseconds on the virtual clock. Comparisons always use wrapping arithmetic.
pub type VirtualTime = u32;

/// One second expressed in virtual-clock units.
pub const MICROS_PER_SECOND: u32 = 1_000_000;

/// Headroom (in microseconds worth of ticks) kept below the 32-bit compare range.
pub const SLEEP_SAFETY_MARGIN_US: u32 = 4_000_000;

/// Free-running hardware tick register.
pub trait TickSource {
    /// Returns the current raw tick count. Wraps silently at `u32::MAX`.
    fn read_tick(&self) -> u32;
}

impl<T> TickSource for &T
where
    T: TickSource + ?Sized,
{
    fn read_tick(&self) -> u32 {
        (**self).read_tick()
    }
}

#[cfg(feature = "alloc")]
impl<T> TickSource for alloc::rc::Rc<T>
where
    T: TickSource + ?Sized,
{
    fn read_tick(&self) -> u32 {
        (**self).read_tick()
    }
}

/// Tick source driven by hand, used by tests and the host emulator.
#[derive(Debug, Default)]
pub struct ManualTickSource {
    tick: Cell<u32>,
}

impl ManualTickSource {
    /// Creates a source that starts at `tick`.
    #[must_use]
    pub const fn new(tick: u32) -> Self {
        Self {
            tick: Cell::new(tick),
        }
    }

    /// Overwrites the raw tick value.
    pub fn set(&self, tick: u32) {
        self.tick.set(tick);
    }

    /// Advances the counter by `ticks`, wrapping like the hardware register.
    pub fn advance(&self, ticks: u32) {
        self.tick.set(self.tick.get().wrapping_add(ticks));
    }
}

impl TickSource for ManualTickSource {
    fn read_tick(&self) -> u32 {
        self.tick.get()
    }
}

/// Non-wrapping (in practice) microsecond clock.
#[derive(Debug)]
pub struct VirtualClock<S> {
    source: S,
    ticks_per_micro: u32,
    last_tick: u32,
    micros: VirtualTime,
}

impl<S> VirtualClock<S>
where
    S: TickSource,
{
    /// Creates a clock anchored at the source's current tick and virtual time zero.
    ///
    /// `ticks_per_micro` is the hardware rate divided by 1 MHz; zero is treated as one.
    #[must_use]
    pub fn new(source: S, ticks_per_micro: u32) -> Self {
        let last_tick = source.read_tick();
        Self {
            source,
            ticks_per_micro: if ticks_per_micro == 0 {
                1
            } else {
                ticks_per_micro
            },
            last_tick,
            micros: 0,
        }
    }

    /// Samples the hardware counter and returns the current virtual time.
    pub fn now(&mut self) -> VirtualTime {
        let tick = self.source.read_tick();
        let elapsed_us = tick.wrapping_sub(self.last_tick) / self.ticks_per_micro;
        // Only the whole microseconds are consumed; the remainder carries over.
        self.last_tick = self
            .last_tick
            .wrapping_add(elapsed_us.wrapping_mul(self.ticks_per_micro));
        self.micros = self.micros.wrapping_add(elapsed_us);
        self.micros
    }

    /// Returns the last value handed out by [`now`](Self::now) without sampling.
    #[must_use]
    pub const fn last_sample(&self) -> VirtualTime {
        self.micros
    }

    /// Reads the raw tick register.
    #[must_use]
    pub fn current_tick(&self) -> u32 {
        self.source.read_tick()
    }

    /// Hardware ticks per microsecond.
    #[must_use]
    pub const fn ticks_per_micro(&self) -> u32 {
        self.ticks_per_micro
    }

    /// Converts microseconds to hardware ticks, wrapping on overflow.
    #[must_use]
    pub const fn micros_to_ticks(&self, micros: u32) -> u32 {
        micros.wrapping_mul(self.ticks_per_micro)
    }

    /// Longest sleep that still fits in a 32-bit tick offset with safety headroom.
    #[must_use]
    pub const fn max_sleep_us(&self) -> u32 {
        let margin_ticks = SLEEP_SAFETY_MARGIN_US.saturating_mul(self.ticks_per_micro);
        (u32::MAX - margin_ticks) / self.ticks_per_micro
    }

    /// Borrows the underlying tick source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }
}

/// Returns `true` while `deadline` still lies ahead of `now` within `window`.
///
/// `now == deadline` counts as reached. Deadlines further than `window` ahead
/// are treated as already in the past, which is how a wrapped difference of a
/// slightly stale deadline reads.
#[must_use]
pub const fn is_pending(now: VirtualTime, deadline: VirtualTime, window: u32) -> bool {
    let ahead = deadline.wrapping_sub(now);
    ahead != 0 && ahead < window
}
