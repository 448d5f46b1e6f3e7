//! Node event catalog and the in-memory ring both targets log from.
//!
//! Event kinds encode to compact numeric codes so the firmware can forward
//! them over a diagnostics channel. Payloads carry the measurements and
//! timings the emulator transcripts and the on-target log print. Everything
//! here stays `no_std` and allocation free.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::button::ButtonEvent;
use crate::clock::VirtualTime;
use crate::display::Layout;
use crate::scheduler::SleepDecision;
use crate::sensor::{Reading, SensorFault};

/// Monotonic identifier assigned to each record; wraps.
pub type EventId = u32;

/// Total number of records retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated node events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeEventKind {
    ConversionStarted,
    SampleCollected,
    SampleMissed(SensorFault),
    OverdueRecovered,
    UpdateModeHold,
    DisplayRefreshed(Layout),
    ButtonEvent,
    RadioTraffic,
    SleepIndefinite,
    SleepSkipped,
    SleepArmed,
    Custom(u16),
}

impl fmt::Display for NodeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEventKind::ConversionStarted => f.write_str("conversion-started"),
            NodeEventKind::SampleCollected => f.write_str("sample-collected"),
            NodeEventKind::SampleMissed(fault) => write!(f, "sample-missed ({fault})"),
            NodeEventKind::OverdueRecovered => f.write_str("overdue-recovered"),
            NodeEventKind::UpdateModeHold => f.write_str("update-mode-hold"),
            NodeEventKind::DisplayRefreshed(layout) => {
                write!(f, "display-refreshed {}", layout.label())
            }
            NodeEventKind::ButtonEvent => f.write_str("button"),
            NodeEventKind::RadioTraffic => f.write_str("radio-traffic"),
            NodeEventKind::SleepIndefinite => f.write_str("sleep-indefinite"),
            NodeEventKind::SleepSkipped => f.write_str("sleep-skipped"),
            NodeEventKind::SleepArmed => f.write_str("sleep-armed"),
            NodeEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl NodeEventKind {
    const CONVERSION_STARTED_CODE: u16 = 0x0001;
    const SAMPLE_COLLECTED_CODE: u16 = 0x0002;
    const OVERDUE_RECOVERED_CODE: u16 = 0x0003;
    const UPDATE_MODE_HOLD_CODE: u16 = 0x0004;
    const BUTTON_CODE: u16 = 0x0005;
    const RADIO_TRAFFIC_CODE: u16 = 0x0006;
    const SAMPLE_MISSED_BASE: u16 = 0x0010;
    const DISPLAY_REFRESHED_BASE: u16 = 0x0020;
    const SLEEP_INDEFINITE_CODE: u16 = 0x0030;
    const SLEEP_SKIPPED_CODE: u16 = 0x0031;
    const SLEEP_ARMED_CODE: u16 = 0x0032;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            NodeEventKind::ConversionStarted => Self::CONVERSION_STARTED_CODE,
            NodeEventKind::SampleCollected => Self::SAMPLE_COLLECTED_CODE,
            NodeEventKind::SampleMissed(fault) => Self::SAMPLE_MISSED_BASE + fault_index(fault),
            NodeEventKind::OverdueRecovered => Self::OVERDUE_RECOVERED_CODE,
            NodeEventKind::UpdateModeHold => Self::UPDATE_MODE_HOLD_CODE,
            NodeEventKind::DisplayRefreshed(layout) => {
                Self::DISPLAY_REFRESHED_BASE + layout_index(layout)
            }
            NodeEventKind::ButtonEvent => Self::BUTTON_CODE,
            NodeEventKind::RadioTraffic => Self::RADIO_TRAFFIC_CODE,
            NodeEventKind::SleepIndefinite => Self::SLEEP_INDEFINITE_CODE,
            NodeEventKind::SleepSkipped => Self::SLEEP_SKIPPED_CODE,
            NodeEventKind::SleepArmed => Self::SLEEP_ARMED_CODE,
            NodeEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`NodeEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::CONVERSION_STARTED_CODE => NodeEventKind::ConversionStarted,
            Self::SAMPLE_COLLECTED_CODE => NodeEventKind::SampleCollected,
            Self::OVERDUE_RECOVERED_CODE => NodeEventKind::OverdueRecovered,
            Self::UPDATE_MODE_HOLD_CODE => NodeEventKind::UpdateModeHold,
            Self::BUTTON_CODE => NodeEventKind::ButtonEvent,
            Self::RADIO_TRAFFIC_CODE => NodeEventKind::RadioTraffic,
            Self::SLEEP_INDEFINITE_CODE => NodeEventKind::SleepIndefinite,
            Self::SLEEP_SKIPPED_CODE => NodeEventKind::SleepSkipped,
            Self::SLEEP_ARMED_CODE => NodeEventKind::SleepArmed,
            value if (Self::SAMPLE_MISSED_BASE..Self::DISPLAY_REFRESHED_BASE).contains(&value) => {
                fault_from_index(value - Self::SAMPLE_MISSED_BASE)
                    .map_or(NodeEventKind::Custom(value), NodeEventKind::SampleMissed)
            }
            value
                if (Self::DISPLAY_REFRESHED_BASE..Self::SLEEP_INDEFINITE_CODE).contains(&value) =>
            {
                layout_from_index(value - Self::DISPLAY_REFRESHED_BASE)
                    .map_or(NodeEventKind::Custom(value), NodeEventKind::DisplayRefreshed)
            }
            other => NodeEventKind::Custom(other),
        }
    }
}

/// Payloads carried alongside node events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    Sample(SampleTelemetry),
    Conversion { ready_at: VirtualTime },
    Overdue { outstanding_us: u32 },
    Button(ButtonEvent),
    Sleep(SleepDecision),
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Sample payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SampleTelemetry {
    pub reading: Reading,
    /// Microseconds since the previous successful sample.
    pub since_previous_us: Option<u32>,
    /// Whether the reading was forwarded to the radio.
    pub notified: bool,
}

/// Record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: VirtualTime,
    pub event: NodeEventKind,
    pub details: TelemetryPayload,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} t={}us {}", self.id, self.timestamp, self.event)?;
        match self.details {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Sample(sample) => {
                write!(f, " {}", sample.reading)?;
                if let Some(gap) = sample.since_previous_us {
                    write!(f, " gap={gap}us")?;
                }
                if sample.notified {
                    f.write_str(" notified")?;
                }
                Ok(())
            }
            TelemetryPayload::Conversion { ready_at } => write!(f, " ready_at={ready_at}us"),
            TelemetryPayload::Overdue { outstanding_us } => {
                write!(f, " outstanding={outstanding_us}us")
            }
            TelemetryPayload::Button(event) => write!(
                f,
                " clicks={} long={}",
                event.clicks, event.long_press
            ),
            TelemetryPayload::Sleep(decision) => write!(f, " {decision}"),
        }
    }
}

/// Ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records node events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    last_sample_at: Option<VirtualTime>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_sample_at: None,
            next_event_id: 0,
        }
    }

    /// Iterates the retained records in chronological order.
    #[must_use]
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Identifier the next record will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records a successful sample and the gap since the previous one.
    pub fn record_sample(
        &mut self,
        reading: Reading,
        notified: bool,
        timestamp: VirtualTime,
    ) -> EventId {
        let since_previous_us = self
            .last_sample_at
            .map(|previous| timestamp.wrapping_sub(previous));
        self.last_sample_at = Some(timestamp);

        self.record(
            NodeEventKind::SampleCollected,
            TelemetryPayload::Sample(SampleTelemetry {
                reading,
                since_previous_us,
                notified,
            }),
            timestamp,
        )
    }

    /// Records the sleep decision of one iteration.
    pub fn record_sleep(&mut self, decision: SleepDecision, timestamp: VirtualTime) -> EventId {
        let event = match decision {
            SleepDecision::Indefinite => NodeEventKind::SleepIndefinite,
            SleepDecision::NoSleep { .. } => NodeEventKind::SleepSkipped,
            SleepDecision::WakeAt { .. } => NodeEventKind::SleepArmed,
        };
        self.record(event, TelemetryPayload::Sleep(decision), timestamp)
    }

    /// Records an arbitrary event with the supplied payload.
    pub fn record(
        &mut self,
        event: NodeEventKind,
        payload: TelemetryPayload,
        timestamp: VirtualTime,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

const fn fault_index(fault: SensorFault) -> u16 {
    match fault {
        SensorFault::Checksum => 0,
        SensorFault::InvalidData => 1,
        SensorFault::Bus => 2,
    }
}

fn fault_from_index(index: u16) -> Option<SensorFault> {
    match index {
        0 => Some(SensorFault::Checksum),
        1 => Some(SensorFault::InvalidData),
        2 => Some(SensorFault::Bus),
        _ => None,
    }
}

const fn layout_index(layout: Layout) -> u16 {
    match layout {
        Layout::ExtData => 0,
        Layout::TempBattery => 1,
        Layout::TempHumidity => 2,
        Layout::Clock => 3,
    }
}

fn layout_from_index(index: u16) -> Option<Layout> {
    match index {
        0 => Some(Layout::ExtData),
        1 => Some(Layout::TempBattery),
        2 => Some(Layout::TempHumidity),
        3 => Some(Layout::Clock),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_decode_to_the_same_kind() {
        let fixtures = [
            (NodeEventKind::ConversionStarted, 0x0001),
            (NodeEventKind::SampleMissed(SensorFault::Bus), 0x0012),
            (NodeEventKind::DisplayRefreshed(Layout::Clock), 0x0023),
            (NodeEventKind::SleepArmed, 0x0032),
        ];

        for (kind, code) in fixtures {
            assert_eq!(kind.to_raw(), code);
            assert_eq!(NodeEventKind::from_raw(code), kind);
        }
    }

    #[test]
    fn unknown_codes_fall_back_to_custom() {
        assert_eq!(NodeEventKind::from_raw(0x0017), NodeEventKind::Custom(0x0017));
        assert_eq!(NodeEventKind::from_raw(0x0028), NodeEventKind::Custom(0x0028));
        assert_eq!(NodeEventKind::Custom(0xBEEF).to_raw(), 0xBEEF);
    }

    #[test]
    fn samples_record_the_gap_since_the_previous_one() {
        let mut recorder = TelemetryRecorder::<8>::new();

        let first = recorder.record_sample(Reading::new(2_150, 4_500), false, 11_000);
        assert_eq!(first, 0);
        match recorder.latest().copied().unwrap().details {
            TelemetryPayload::Sample(sample) => assert_eq!(sample.since_previous_us, None),
            other => panic!("expected sample payload, got {other:?}"),
        }

        recorder.record_sample(Reading::new(2_160, 4_480), true, 10_011_000);
        match recorder.latest().copied().unwrap().details {
            TelemetryPayload::Sample(sample) => {
                assert_eq!(sample.since_previous_us, Some(10_000_000));
                assert!(sample.notified);
            }
            other => panic!("expected sample payload, got {other:?}"),
        }
    }

    #[test]
    fn sleep_decisions_map_to_their_event_kind() {
        let mut recorder = TelemetryRecorder::<8>::new();
        recorder.record_sleep(SleepDecision::Indefinite, 0);
        recorder.record_sleep(
            SleepDecision::NoSleep {
                budget_us: 0,
                loop_us: 10,
            },
            10,
        );
        recorder.record_sleep(
            SleepDecision::WakeAt {
                tick: 5_000,
                sleep_us: 4_990,
            },
            20,
        );

        let kinds: heapless::Vec<NodeEventKind, 3> =
            recorder.oldest_first().map(|record| record.event).collect();
        assert_eq!(
            kinds.as_slice(),
            &[
                NodeEventKind::SleepIndefinite,
                NodeEventKind::SleepSkipped,
                NodeEventKind::SleepArmed
            ]
        );
    }

    #[test]
    fn ring_keeps_the_newest_records() {
        let mut recorder = TelemetryRecorder::<4>::new();
        for timestamp in 0..10 {
            recorder.record(NodeEventKind::RadioTraffic, TelemetryPayload::none(), timestamp);
        }

        assert_eq!(recorder.len(), 4);
        assert_eq!(recorder.next_id(), 10);
        let first = recorder.oldest_first().next().copied().unwrap();
        assert_eq!(first.id, 6);
    }

    #[test]
    fn records_render_their_payload() {
        let mut recorder = TelemetryRecorder::<4>::new();
        recorder.record(
            NodeEventKind::ConversionStarted,
            TelemetryPayload::Conversion { ready_at: 11_000 },
            0,
        );

        let mut text = heapless::String::<64>::new();
        let record = recorder.latest().copied().unwrap();
        core::fmt::write(&mut text, format_args!("{record}")).unwrap();
        assert_eq!(text.as_str(), "#0 t=0us conversion-started ready_at=11000us");
    }
}
