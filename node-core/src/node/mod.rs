//! The cooperative main loop.
//!
//! [`NodeLoop::run_iteration`] is one pass of the firmware's forever loop. It
//! runs every periodic activity in a fixed order, lets each one register the
//! deadline it needs, and finishes by programming the wake source. The caller
//! then suspends (or not) according to the returned [`SleepDecision`] and
//! calls it again after the next wake.

use crate::button::{ButtonDebouncer, ButtonEvent, ButtonInput};
use crate::clock::{SecondsCounter, TickSource, VirtualClock, VirtualTime};
use crate::config::NodeConfig;
use crate::display::{
    Display, ExternalData, ExternalOverlay, Layout, ScreenInputs, compose_screen, select_layout,
};
use crate::scheduler::{Scheduler, SleepDecision, WakeControl, advance_cadence, is_due};
use crate::sensor::{AcquisitionEvent, Reading, SensorAcquisition, SensorPhase, SensorTransport};
use crate::telemetry::{NodeEventKind, TelemetryPayload, TelemetryRecorder};

/// Longest the node sleeps while the radio has traffic queued (62.5 ms).
pub const RADIO_SERVICE_US: u32 = 62_500;

/// Radio stack as seen by the main loop.
pub trait Radio {
    /// A peer is connected and has notifications enabled.
    fn link_allows_notification(&self) -> bool;

    /// Pushes a fresh reading to the connected peer.
    fn notify_new_reading(&mut self, reading: Reading);

    /// Events are queued that the stack must service soon.
    fn has_pending_traffic(&self) -> bool;
}

/// Reports whether a firmware update is streaming in.
pub trait UpdateFlag {
    fn is_update_in_progress(&self) -> bool;
}

impl UpdateFlag for bool {
    fn is_update_in_progress(&self) -> bool {
        *self
    }
}

/// Summary of one loop iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IterationReport {
    /// Loop epoch of the iteration.
    pub epoch: VirtualTime,
    /// Elapsed seconds after bookkeeping.
    pub seconds: u32,
    /// Outcome of the acquisition step (or of the forced collect).
    pub acquisition: AcquisitionEvent,
    /// A lost wake was detected and the conversion collected late.
    pub overdue_recovered: bool,
    /// Update mode held the loop awake; nothing else ran.
    pub update_hold: bool,
    pub button: Option<ButtonEvent>,
    /// Layout drawn this iteration, if the display was refreshed.
    pub refreshed: Option<Layout>,
    pub decision: SleepDecision,
}

/// Owner of every piece of loop state.
pub struct NodeLoop<S, T, D, R> {
    scheduler: Scheduler<S>,
    sensor: SensorAcquisition<T>,
    display: D,
    radio: R,
    config: NodeConfig,
    seconds: SecondsCounter,
    display_next: VirtualTime,
    button: ButtonDebouncer,
    overlay: ExternalOverlay,
    layout_offset: u8,
    last_reading: Option<Reading>,
    radio_busy: bool,
    telemetry: TelemetryRecorder,
}

impl<S, T, D, R> NodeLoop<S, T, D, R>
where
    S: TickSource,
    T: SensorTransport,
    D: Display,
    R: Radio,
{
    /// Builds the loop; the first conversion and refresh are due immediately.
    #[must_use]
    pub fn new(
        clock: VirtualClock<S>,
        transport: T,
        display: D,
        radio: R,
        config: NodeConfig,
    ) -> Self {
        let config = config.sanitized();
        let mut scheduler = Scheduler::new(clock);
        let now = scheduler.now();

        Self {
            scheduler,
            sensor: SensorAcquisition::new(transport, config.acquisition_timing(), now),
            display,
            radio,
            config,
            seconds: SecondsCounter::new(now),
            display_next: now,
            button: ButtonDebouncer::new(),
            overlay: ExternalOverlay::new(),
            layout_offset: 0,
            last_reading: None,
            radio_busy: false,
            telemetry: TelemetryRecorder::new(),
        }
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler<S> {
        &self.scheduler
    }

    #[must_use]
    pub const fn sensor(&self) -> &SensorAcquisition<T> {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut SensorAcquisition<T> {
        &mut self.sensor
    }

    #[must_use]
    pub const fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    #[must_use]
    pub const fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    #[must_use]
    pub const fn seconds(&self) -> &SecondsCounter {
        &self.seconds
    }

    /// Trims the length of one counted second.
    pub fn set_seconds_step_us(&mut self, step_us: u32) {
        self.seconds.set_step_us(step_us);
    }

    /// Next display refresh deadline.
    #[must_use]
    pub const fn display_next(&self) -> VirtualTime {
        self.display_next
    }

    #[must_use]
    pub const fn last_reading(&self) -> Option<Reading> {
        self.last_reading
    }

    #[must_use]
    pub const fn layout_offset(&self) -> u8 {
        self.layout_offset
    }

    /// Shows client data from now on and refreshes on the next iteration.
    pub fn show_external(&mut self, data: ExternalData) {
        self.overlay.show(data, self.seconds.seconds());
        self.refresh_soon();
    }

    /// Seconds the external overlay stays on screen.
    #[must_use]
    pub fn overlay_remaining_secs(&self) -> u32 {
        self.overlay.remaining_secs(self.seconds.seconds())
    }

    /// Pulls the display deadline in to the current time.
    pub fn refresh_soon(&mut self) {
        self.display_next = self.scheduler.now();
    }

    /// Runs one loop iteration and programs `wake` for the following sleep.
    pub fn run_iteration<W, U, B>(
        &mut self,
        wake: &mut W,
        update: &U,
        button: &B,
    ) -> IterationReport
    where
        W: WakeControl,
        U: UpdateFlag + ?Sized,
        B: ButtonInput + ?Sized,
    {
        let epoch = self.scheduler.begin_iteration();
        self.seconds.advance(epoch);
        let updating = update.is_update_in_progress();

        let mut report = IterationReport {
            epoch,
            seconds: self.seconds.seconds(),
            acquisition: AcquisitionEvent::Waiting,
            overdue_recovered: false,
            update_hold: false,
            button: None,
            refreshed: None,
            decision: SleepDecision::Indefinite,
        };

        if let SensorPhase::Measuring { started_at, .. } = self.sensor.phase()
            && self.sensor.is_wake_overdue(epoch, self.config.overdue_margin_us)
            && let Some(event) = self.sensor.force_collect(&mut self.scheduler)
        {
            self.telemetry.record(
                NodeEventKind::OverdueRecovered,
                TelemetryPayload::Overdue {
                    outstanding_us: epoch.wrapping_sub(started_at),
                },
                epoch,
            );
            self.handle_acquisition(event, !updating);
            report.acquisition = event;
            report.overdue_recovered = true;
        }

        if updating {
            wake.force_no_sleep_this_cycle();
            let now = self.scheduler.now();
            self.hold_cadences(now);
            self.telemetry
                .record(NodeEventKind::UpdateModeHold, TelemetryPayload::none(), now);
            report.update_hold = true;
            report.decision = SleepDecision::NoSleep {
                budget_us: 0,
                loop_us: now.wrapping_sub(epoch),
            };
            return report;
        }

        if let Some(event) = self.button.handle(button.is_pressed(), &mut self.scheduler) {
            self.handle_button(event);
            report.button = Some(event);
        }

        if !report.overdue_recovered {
            let event = self.sensor.step(&mut self.scheduler);
            self.handle_acquisition(event, true);
            report.acquisition = event;
        }

        let pending = self.radio.has_pending_traffic();
        if pending {
            self.scheduler.request_wake_after(RADIO_SERVICE_US);
            if !self.radio_busy {
                self.telemetry.record(
                    NodeEventKind::RadioTraffic,
                    TelemetryPayload::none(),
                    self.scheduler.loop_epoch(),
                );
            }
        }
        self.radio_busy = pending;

        report.refreshed = self.refresh_display_if_due();

        let decision = self.scheduler.commit_sleep_decision(wake);
        let now = self.scheduler.now();
        self.telemetry.record_sleep(decision, now);
        report.decision = decision;
        report
    }

    fn handle_acquisition(&mut self, event: AcquisitionEvent, publish: bool) {
        let now = self.scheduler.now();
        match event {
            AcquisitionEvent::Waiting => {}
            AcquisitionEvent::Started { ready_at } => {
                self.telemetry.record(
                    NodeEventKind::ConversionStarted,
                    TelemetryPayload::Conversion { ready_at },
                    now,
                );
            }
            AcquisitionEvent::Collected(reading) => {
                self.last_reading = Some(reading);
                let mut notified = false;
                if publish {
                    self.display.notify_new_reading(reading);
                    if self.radio.link_allows_notification() {
                        self.radio.notify_new_reading(reading);
                        notified = true;
                    }
                }
                self.telemetry.record_sample(reading, notified, now);
            }
            AcquisitionEvent::Missed(fault) => {
                self.telemetry.record(
                    NodeEventKind::SampleMissed(fault),
                    TelemetryPayload::none(),
                    now,
                );
            }
        }
    }

    fn handle_button(&mut self, event: ButtonEvent) {
        if event.long_press {
            self.overlay.clear();
        } else {
            self.layout_offset = self.layout_offset.wrapping_add(event.clicks);
        }
        self.refresh_soon();
        self.telemetry.record(
            NodeEventKind::ButtonEvent,
            TelemetryPayload::Button(event),
            self.scheduler.loop_epoch(),
        );
    }

    // Nothing is sampled or drawn during an update, but the persistent
    // deadlines keep pace with the clock so they never go stale.
    fn hold_cadences(&mut self, now: VirtualTime) {
        self.sensor.hold(now);
        let interval = self.config.display_interval_us();
        while interval > 0 && is_due(now, self.display_next) {
            (self.display_next, _) = advance_cadence(self.display_next, interval, now);
        }
    }

    fn refresh_display_if_due(&mut self) -> Option<Layout> {
        if !self.scheduler.should_wake(self.display_next) {
            return None;
        }

        let now = self.scheduler.now();
        let (next, _) = advance_cadence(self.display_next, self.config.display_interval_us(), now);
        self.display_next = next;
        self.scheduler.request_wake_no_later_than(self.display_next);

        let elapsed_secs = self.seconds.seconds();
        let overlay_remaining = self.overlay.remaining_secs(elapsed_secs);
        let layout = select_layout(
            self.config.display,
            overlay_remaining,
            elapsed_secs,
            self.layout_offset,
        );
        let screen = compose_screen(
            layout,
            self.config.display,
            ScreenInputs {
                reading: self.last_reading,
                overlay: self.overlay.data(),
                elapsed_secs,
                link: self.radio.link_allows_notification(),
            },
        );
        self.display.request_refresh(layout, &screen);
        self.telemetry.record(
            NodeEventKind::DisplayRefreshed(layout),
            TelemetryPayload::none(),
            now,
        );
        Some(layout)
    }
}
