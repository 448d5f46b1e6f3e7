//! Two-phase temperature/humidity acquisition.
//!
//! A measurement is started, left to convert for a fixed time, and collected
//! on a later loop iteration. Both waits are expressed as deadlines on the
//! [`Scheduler`], so the node sleeps through the conversion instead of
//! blocking on the bus.
//!
//! The acquisition cadence is advanced by a fixed increment after every
//! collect attempt. Iterations that run late therefore compress the next
//! cycle instead of shifting the whole schedule.

use core::fmt;

use crate::clock::{TickSource, VirtualTime};
use crate::scheduler::{Scheduler, advance_cadence, is_due};

pub mod sht;

/// One validated sensor sample in fixed-point units.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Reading {
    /// Temperature in hundredths of a degree Celsius.
    pub temperature_centi_c: i16,
    /// Relative humidity in hundredths of a percent (0..=9999).
    pub humidity_centi_pct: u16,
}

impl Reading {
    #[must_use]
    pub const fn new(temperature_centi_c: i16, humidity_centi_pct: u16) -> Self {
        Self {
            temperature_centi_c,
            humidity_centi_pct,
        }
    }

    /// Temperature rounded to tenths of a degree Celsius.
    #[must_use]
    pub const fn temperature_deci_c(&self) -> i16 {
        if self.temperature_centi_c < 0 {
            self.temperature_centi_c.saturating_sub(5) / 10
        } else {
            self.temperature_centi_c.saturating_add(5) / 10
        }
    }

    /// Humidity rounded half-up to tenths of a percent.
    #[must_use]
    pub const fn humidity_deci_pct(&self) -> u16 {
        self.humidity_centi_pct.saturating_add(5) / 10
    }

    /// Humidity rounded to whole percent.
    #[must_use]
    pub const fn humidity_pct(&self) -> u16 {
        self.humidity_centi_pct.saturating_add(50) / 100
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deci = self.temperature_deci_c();
        let sign = if deci < 0 { "-" } else { "" };
        let abs = deci.unsigned_abs();
        write!(
            f,
            "{sign}{}.{}C {}%",
            abs / 10,
            abs % 10,
            self.humidity_pct()
        )
    }
}

/// Reason a collect attempt produced no reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorFault {
    /// CRC-8 over a data word did not match.
    Checksum,
    /// The sensor returned a value it uses to mark an invalid conversion.
    InvalidData,
    /// The bus transaction was not acknowledged or aborted.
    Bus,
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorFault::Checksum => f.write_str("checksum mismatch"),
            SensorFault::InvalidData => f.write_str("invalid data"),
            SensorFault::Bus => f.write_str("bus error"),
        }
    }
}

/// Bus-level driver for the physical sensor.
pub trait SensorTransport {
    /// Issues the command that starts a conversion.
    fn start_conversion(&mut self);

    /// Reads and validates the result of the last conversion.
    fn collect(&mut self) -> Result<Reading, SensorFault>;

    /// Best-effort recovery after a failed collect.
    fn reset(&mut self);
}

/// Acquisition phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorPhase {
    Idle,
    Measuring {
        started_at: VirtualTime,
        ready_at: VirtualTime,
    },
}

/// Timing for the acquisition cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AcquisitionTiming {
    /// Distance between successive conversion starts.
    pub sampling_interval_us: u32,
    /// Worst-case conversion latency of the sensor.
    pub conversion_time_us: u32,
}

/// What one call to [`SensorAcquisition::step`] did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquisitionEvent {
    /// Nothing was due.
    Waiting,
    /// A conversion was started and will be ready at `ready_at`.
    Started { ready_at: VirtualTime },
    /// A conversion was collected successfully.
    Collected(Reading),
    /// A collect attempt failed; the transport was reset.
    Missed(SensorFault),
}

/// Two-phase acquisition state machine over a [`SensorTransport`].
#[derive(Debug)]
pub struct SensorAcquisition<T> {
    transport: T,
    timing: AcquisitionTiming,
    phase: SensorPhase,
    next_cadence: VirtualTime,
    collected: u32,
    missed: u32,
    skipped_cycles: u32,
}

impl<T> SensorAcquisition<T>
where
    T: SensorTransport,
{
    /// Creates an idle state machine whose first conversion starts at `first_start`.
    #[must_use]
    pub const fn new(transport: T, timing: AcquisitionTiming, first_start: VirtualTime) -> Self {
        Self {
            transport,
            timing,
            phase: SensorPhase::Idle,
            next_cadence: first_start,
            collected: 0,
            missed: 0,
            skipped_cycles: 0,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> SensorPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.phase, SensorPhase::Idle)
    }

    /// Virtual time of the next scheduled conversion start.
    #[must_use]
    pub const fn next_cadence(&self) -> VirtualTime {
        self.next_cadence
    }

    #[must_use]
    pub const fn timing(&self) -> AcquisitionTiming {
        self.timing
    }

    /// Number of successful collects so far.
    #[must_use]
    pub const fn samples_collected(&self) -> u32 {
        self.collected
    }

    /// Number of failed collects so far.
    #[must_use]
    pub const fn samples_missed(&self) -> u32 {
        self.missed
    }

    /// Whole cadence periods dropped after stalls longer than one interval.
    #[must_use]
    pub const fn skipped_cycles(&self) -> u32 {
        self.skipped_cycles
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Advances the state machine by at most one transition.
    pub fn step<S>(&mut self, scheduler: &mut Scheduler<S>) -> AcquisitionEvent
    where
        S: TickSource,
    {
        match self.phase {
            SensorPhase::Idle => {
                if !scheduler.should_wake(self.next_cadence) {
                    return AcquisitionEvent::Waiting;
                }
                self.transport.start_conversion();
                let started_at = scheduler.now();
                let ready_at = scheduler.request_wake_after(self.timing.conversion_time_us);
                self.phase = SensorPhase::Measuring {
                    started_at,
                    ready_at,
                };
                AcquisitionEvent::Started { ready_at }
            }
            SensorPhase::Measuring { ready_at, .. } => {
                if !scheduler.should_wake(ready_at) {
                    return AcquisitionEvent::Waiting;
                }
                self.collect(scheduler)
            }
        }
    }

    /// Drops every due conversion start without touching the transport.
    ///
    /// Used while the loop is held awake for another reason, so the cadence
    /// never falls behind the clock. An outstanding conversion is left alone.
    pub fn hold(&mut self, now: VirtualTime) {
        if self.timing.sampling_interval_us == 0 {
            return;
        }
        while self.is_idle() && is_due(now, self.next_cadence) {
            self.skipped_cycles = self.skipped_cycles.wrapping_add(1);
            self.advance_cadence(now);
        }
    }

    /// Returns `true` when a conversion is outstanding well past its deadline.
    ///
    /// This only happens when the wake that should have ended the conversion
    /// wait was lost.
    #[must_use]
    pub fn is_wake_overdue(&self, now: VirtualTime, margin_us: u32) -> bool {
        match self.phase {
            SensorPhase::Idle => false,
            SensorPhase::Measuring { started_at, .. } => {
                let limit = self.timing.conversion_time_us.saturating_add(margin_us);
                now.wrapping_sub(started_at) > limit
            }
        }
    }

    /// Runs the collect transition immediately if a conversion is outstanding.
    pub fn force_collect<S>(&mut self, scheduler: &mut Scheduler<S>) -> Option<AcquisitionEvent>
    where
        S: TickSource,
    {
        if self.is_idle() {
            None
        } else {
            Some(self.collect(scheduler))
        }
    }

    fn collect<S>(&mut self, scheduler: &mut Scheduler<S>) -> AcquisitionEvent
    where
        S: TickSource,
    {
        let event = match self.transport.collect() {
            Ok(reading) => {
                self.collected = self.collected.wrapping_add(1);
                AcquisitionEvent::Collected(reading)
            }
            Err(fault) => {
                self.missed = self.missed.wrapping_add(1);
                self.transport.reset();
                AcquisitionEvent::Missed(fault)
            }
        };

        self.phase = SensorPhase::Idle;
        self.advance_cadence(scheduler.now());
        scheduler.request_wake_no_later_than(self.next_cadence);
        event
    }

    // After a stall longer than a whole interval, the periods that were
    // missed entirely are dropped instead of replayed back to back.
    fn advance_cadence(&mut self, now: VirtualTime) {
        let interval = self.timing.sampling_interval_us;
        let (next, skipped) = advance_cadence(self.next_cadence, interval, now);
        self.next_cadence = next;
        self.skipped_cycles = self.skipped_cycles.wrapping_add(skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualTickSource, VirtualClock};

    const TIMING: AcquisitionTiming = AcquisitionTiming {
        sampling_interval_us: 10_000_000,
        conversion_time_us: 11_000,
    };

    #[derive(Default)]
    struct ScriptedTransport {
        starts: u32,
        collects: u32,
        resets: u32,
        fail_next: bool,
    }

    impl SensorTransport for ScriptedTransport {
        fn start_conversion(&mut self) {
            self.starts += 1;
        }

        fn collect(&mut self) -> Result<Reading, SensorFault> {
            self.collects += 1;
            if core::mem::take(&mut self.fail_next) {
                Err(SensorFault::Checksum)
            } else {
                Ok(Reading::new(2_150, 4_500))
            }
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn scheduler(ticks: &ManualTickSource) -> Scheduler<&ManualTickSource> {
        Scheduler::new(VirtualClock::new(ticks, 1))
    }

    #[test]
    fn starts_then_collects_after_the_conversion_time() {
        let ticks = ManualTickSource::new(0);
        let mut scheduler = scheduler(&ticks);
        let mut sensor = SensorAcquisition::new(ScriptedTransport::default(), TIMING, 0);

        scheduler.begin_iteration();
        assert_eq!(
            sensor.step(&mut scheduler),
            AcquisitionEvent::Started { ready_at: 11_000 }
        );
        assert_eq!(scheduler.wake_budget(), Some(11_000));
        assert_eq!(sensor.next_cadence(), 0);

        ticks.set(5_000);
        scheduler.begin_iteration();
        assert_eq!(sensor.step(&mut scheduler), AcquisitionEvent::Waiting);
        assert_eq!(scheduler.wake_budget(), Some(6_000));

        ticks.set(11_000);
        scheduler.begin_iteration();
        assert_eq!(
            sensor.step(&mut scheduler),
            AcquisitionEvent::Collected(Reading::new(2_150, 4_500))
        );
        assert!(sensor.is_idle());
        assert_eq!(sensor.next_cadence(), 10_000_000);
        assert_eq!(scheduler.wake_budget(), Some(10_000_000 - 11_000));
        assert_eq!(sensor.transport().starts, 1);
        assert_eq!(sensor.transport().collects, 1);
    }

    #[test]
    fn failed_collect_resets_and_still_advances_the_cadence() {
        let ticks = ManualTickSource::new(0);
        let mut scheduler = scheduler(&ticks);
        let transport = ScriptedTransport {
            fail_next: true,
            ..ScriptedTransport::default()
        };
        let mut sensor = SensorAcquisition::new(transport, TIMING, 0);

        scheduler.begin_iteration();
        sensor.step(&mut scheduler);
        ticks.set(11_000);
        scheduler.begin_iteration();

        assert_eq!(
            sensor.step(&mut scheduler),
            AcquisitionEvent::Missed(SensorFault::Checksum)
        );
        assert_eq!(sensor.transport().resets, 1);
        assert_eq!(sensor.samples_missed(), 1);
        assert_eq!(sensor.samples_collected(), 0);
        assert_eq!(sensor.next_cadence(), 10_000_000);
    }

    #[test]
    fn overdue_detection_uses_conversion_time_plus_margin() {
        let ticks = ManualTickSource::new(0);
        let mut scheduler = scheduler(&ticks);
        let mut sensor = SensorAcquisition::new(ScriptedTransport::default(), TIMING, 0);

        assert!(!sensor.is_wake_overdue(1_000_000, 50_000));
        scheduler.begin_iteration();
        sensor.step(&mut scheduler);

        assert!(!sensor.is_wake_overdue(61_000, 50_000));
        assert!(sensor.is_wake_overdue(61_001, 50_000));

        ticks.set(70_000);
        scheduler.begin_iteration();
        assert!(matches!(
            sensor.force_collect(&mut scheduler),
            Some(AcquisitionEvent::Collected(_))
        ));
        assert_eq!(sensor.force_collect(&mut scheduler), None);
    }

    #[test]
    fn long_stall_skips_whole_periods_but_keeps_the_grid() {
        let ticks = ManualTickSource::new(0);
        let mut scheduler = scheduler(&ticks);
        let mut sensor = SensorAcquisition::new(ScriptedTransport::default(), TIMING, 0);

        scheduler.begin_iteration();
        sensor.step(&mut scheduler);
        // The wake for the collect arrives 35 s late.
        ticks.set(35_000_000);
        scheduler.begin_iteration();
        sensor.step(&mut scheduler);

        assert_eq!(sensor.next_cadence(), 30_000_000);
        assert_eq!(sensor.skipped_cycles(), 2);
    }

    #[test]
    fn reading_rounds_for_display() {
        let reading = Reading::new(2_156, 4_551);
        assert_eq!(reading.temperature_deci_c(), 216);
        assert_eq!(reading.humidity_pct(), 46);

        let mut text = heapless::String::<16>::new();
        core::fmt::write(&mut text, format_args!("{reading}")).unwrap();
        assert_eq!(text.as_str(), "21.6C 46%");

        let mut cold = heapless::String::<16>::new();
        core::fmt::write(&mut cold, format_args!("{}", Reading::new(-1_234, 0))).unwrap();
        assert_eq!(cold.as_str(), "-12.3C 0%");
    }

    #[test]
    fn humidity_rounding_saturates_at_the_top_of_the_range() {
        let pegged = Reading::new(0, u16::MAX);
        assert_eq!(pegged.humidity_pct(), u16::MAX / 100);
        assert_eq!(pegged.humidity_deci_pct(), u16::MAX / 10);
        assert_eq!(Reading::new(0, 4_541).humidity_deci_pct(), 454);
    }
}
