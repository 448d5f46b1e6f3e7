use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use node_core::button::ButtonInput;
use node_core::clock::{ManualTickSource, VirtualClock};
use node_core::config::NodeConfig;
use node_core::display::{Display, ExternalData, Layout, Screen, TemperatureSymbol};
use node_core::node::{NodeLoop, Radio};
use node_core::scheduler::{RecordingWakeControl, SleepDecision};
use node_core::sensor::sht::{self, Calibration, ShtVariant};
use node_core::sensor::{Reading, SensorFault, SensorTransport};
use node_core::telemetry::{EventId, NodeEventKind};

use crate::commands::{self, Command};

/// Simulated tick rate (16 MHz system timer).
pub const TICKS_PER_MICRO: u32 = 16;
/// Tick register value at power-up; wraps a few milliseconds into the session.
const INITIAL_TICK: u32 = 0xFFFF_0000;
/// Simulated time that passes when the loop declines to sleep.
const NO_SLEEP_STEP_US: u64 = 100;
/// Longest stretch simulated without running an iteration.
const MAX_STEP_US: u64 = 60_000_000;
const DEFAULT_LOG_LINES: usize = 10;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("run", "run <n>(us|ms|s)            - let simulated time pass"),
    ("step", "step                        - run one loop iteration now"),
    (
        "fault",
        "fault <checksum|invalid|bus> - fail the next sensor collect",
    ),
    ("climate", "climate <deci-C> <rh%>      - set the simulated air"),
    ("update", "update <on|off>             - toggle firmware update mode"),
    ("link", "link <on|off>               - connect or drop the radio peer"),
    ("traffic", "traffic <on|off>            - mark radio events as queued"),
    ("press", "press <n>(us|ms|s)          - hold the button down"),
    (
        "ext",
        "ext <big> <small> [secs]    - show client numbers (in tenths)",
    ),
    ("late", "late <n>(us|ms|s)           - deliver the next wake late"),
    ("trace", "trace <on|off>              - print every sleep decision"),
    ("status", "status                      - show node state"),
    ("log", "log [n]                     - show the newest telemetry"),
    ("help", "help [topic]                - show help for a command"),
];

/// Startup options collected from the command line.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub config: NodeConfig,
    pub transcript: Option<PathBuf>,
}

type SimNode = NodeLoop<Rc<ManualTickSource>, SimSensor, SimDisplay, SimRadio>;

pub struct Session {
    node: SimNode,
    ticks: Rc<ManualTickSource>,
    wake: RecordingWakeControl,
    button: SimButton,
    release_in_us: Option<u64>,
    updating: bool,
    late_us: u64,
    trace: bool,
    elapsed_us: u64,
    next_record: EventId,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(options: SessionOptions) -> io::Result<Self> {
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        let ticks = Rc::new(ManualTickSource::new(INITIAL_TICK));
        let clock = VirtualClock::new(Rc::clone(&ticks), TICKS_PER_MICRO);
        let node = NodeLoop::new(
            clock,
            SimSensor::new(options.config.calibration),
            SimDisplay::default(),
            SimRadio::default(),
            options.config,
        );

        Ok(Self {
            node,
            ticks,
            wake: RecordingWakeControl::new(),
            button: SimButton::default(),
            release_in_us: None,
            updating: false,
            late_us: 0,
            trace: false,
            elapsed_us: 0,
            next_record: 0,
            transcript,
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let lines = match commands::parse(trimmed) {
            Ok(command) => self.execute(command),
            Err(error) => vec![format!("ERR syntax {error}")],
        };

        self.record_output(&lines)?;
        Ok(lines)
    }

    fn execute(&mut self, command: Command<'_>) -> Vec<String> {
        match command {
            Command::Run(duration) => self.advance(duration_micros(duration)),
            Command::Step => self.advance(0),
            Command::Fault(fault) => {
                self.node.sensor_mut().transport_mut().pending_fault = Some(fault);
                vec![format!("OK next collect fails: {fault}")]
            }
            Command::Climate {
                temperature_deci_c,
                humidity_pct,
            } => {
                let reading = Reading::new(
                    temperature_deci_c.saturating_mul(10),
                    u16::from(humidity_pct.min(99)) * 100,
                );
                self.node.sensor_mut().transport_mut().climate = reading;
                vec![format!("OK climate {reading}")]
            }
            Command::Update(on) => {
                self.updating = on;
                vec![format!("OK update mode {}", on_off(on))]
            }
            Command::Link(on) => {
                self.node.radio_mut().connected = on;
                vec![format!("OK link {}", on_off(on))]
            }
            Command::Traffic(on) => {
                self.node.radio_mut().pending = on;
                vec![format!("OK radio traffic {}", on_off(on))]
            }
            Command::Press(duration) => {
                self.button.pressed = true;
                self.release_in_us = Some(duration_micros(duration));
                vec![format!("OK button held for {}", format_micros(duration_micros(duration)))]
            }
            Command::Ext {
                big_x10,
                small_x10,
                valid_for_secs,
            } => {
                self.node.show_external(ExternalData {
                    big_x10,
                    small_x10,
                    valid_for_secs,
                    ..ExternalData::default()
                });
                vec![format!("OK overlay for {valid_for_secs}s")]
            }
            Command::Late(duration) => {
                self.late_us = duration_micros(duration).min(MAX_STEP_US);
                vec![format!(
                    "OK next wake arrives {} late",
                    format_micros(self.late_us)
                )]
            }
            Command::Trace(on) => {
                self.trace = on;
                vec![format!("OK trace {}", on_off(on))]
            }
            Command::Status => self.status_lines(),
            Command::Log(count) => self.log_lines(count.unwrap_or(DEFAULT_LOG_LINES)),
            Command::Help(topic) => help_lines(topic),
        }
    }

    /// Runs the loop the way the firmware does: iterate, then sleep for as
    /// long as the decision allows or until the button changes level.
    fn advance(&mut self, duration_us: u64) -> Vec<String> {
        let end = self.elapsed_us.saturating_add(duration_us);
        let mut lines = Vec::new();
        let mut holds = 0_u32;

        loop {
            let report = self
                .node
                .run_iteration(&mut self.wake, &self.updating, &self.button);
            if report.update_hold {
                holds += 1;
            }
            self.collect_output(&mut lines);

            let wake_in = match report.decision {
                SleepDecision::WakeAt { sleep_us, .. } => {
                    Some(u64::from(sleep_us) + mem::take(&mut self.late_us))
                }
                SleepDecision::NoSleep { .. } => Some(NO_SLEEP_STEP_US),
                SleepDecision::Indefinite => None,
            };

            let mut step = end.saturating_sub(self.elapsed_us).min(MAX_STEP_US);
            if let Some(wake_in) = wake_in {
                step = step.min(wake_in);
            }
            if let Some(release_in) = self.release_in_us {
                step = step.min(release_in);
            }
            self.pass(step);

            if self.elapsed_us >= end {
                break;
            }
        }

        if holds > 0 {
            lines.push(format!(
                "{} update mode held the loop awake for {holds} iterations",
                self.stamp()
            ));
        }
        lines
    }

    fn pass(&mut self, micros: u64) {
        let ticks = micros.saturating_mul(u64::from(TICKS_PER_MICRO));
        self.ticks
            .advance(u32::try_from(ticks).unwrap_or(u32::MAX));
        self.elapsed_us = self.elapsed_us.saturating_add(micros);

        if let Some(release_in) = self.release_in_us {
            let remaining = release_in.saturating_sub(micros);
            if remaining == 0 {
                self.button.pressed = false;
                self.release_in_us = None;
            } else {
                self.release_in_us = Some(remaining);
            }
        }
    }

    fn collect_output(&mut self, lines: &mut Vec<String>) {
        let stamp = self.stamp();
        for line in self.node.display_mut().pending.drain(..) {
            lines.push(format!("{stamp} {line}"));
        }

        let next = self.next_record;
        for record in self.node.telemetry().oldest_first() {
            if record.id.wrapping_sub(next) > u32::MAX / 2 {
                continue;
            }
            let shown = match record.event {
                NodeEventKind::DisplayRefreshed(_) | NodeEventKind::UpdateModeHold => false,
                NodeEventKind::SleepArmed
                | NodeEventKind::SleepSkipped
                | NodeEventKind::SleepIndefinite => self.trace,
                _ => true,
            };
            if shown {
                lines.push(format!("{stamp} {record}"));
            }
        }
        self.next_record = self.node.telemetry().next_id();
    }

    fn status_lines(&self) -> Vec<String> {
        let sensor = self.node.sensor();
        let radio = self.node.radio();
        let display = self.node.display();
        let mut lines = vec![
            format!(
                "elapsed={} seconds={} virtual={}us tick={:#010x}",
                format_micros(self.elapsed_us),
                self.node.seconds().seconds(),
                self.node.scheduler().clock().last_sample(),
                self.node.scheduler().clock().current_tick()
            ),
            format!(
                "sensor phase={:?} next-start={}us collected={} missed={} skipped-cycles={}",
                sensor.phase(),
                sensor.next_cadence(),
                sensor.samples_collected(),
                sensor.samples_missed(),
                sensor.skipped_cycles()
            ),
            format!(
                "display next={}us refreshes={} offset={} overlay={}s",
                self.node.display_next(),
                display.refreshes,
                self.node.layout_offset(),
                self.node.overlay_remaining_secs()
            ),
            format!(
                "radio link={} traffic={} notifications={}",
                on_off(radio.connected),
                on_off(radio.pending),
                radio.notifications
            ),
            format!(
                "update={} button={} last-wake={:?}",
                on_off(self.updating),
                if self.button.pressed { "down" } else { "up" },
                self.wake.last()
            ),
        ];
        match self.node.last_reading() {
            Some(reading) => lines.push(format!("last reading {reading}")),
            None => lines.push("no reading yet".to_string()),
        }
        lines
    }

    fn log_lines(&self, count: usize) -> Vec<String> {
        let telemetry = self.node.telemetry();
        let skip = telemetry.len().saturating_sub(count);
        telemetry
            .oldest_first()
            .skip(skip)
            .map(ToString::to_string)
            .collect()
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        let elapsed = self.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }

    fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_us)
    }

    fn stamp(&self) -> String {
        format!("[+{:>10}]", format_micros(self.elapsed_us))
    }
}

/// SHTC3 stand-in that produces real frames and decodes them through the codec.
struct SimSensor {
    climate: Reading,
    calibration: Calibration,
    pending_fault: Option<SensorFault>,
}

impl SimSensor {
    fn new(calibration: Calibration) -> Self {
        Self {
            climate: Reading::new(2_150, 4_500),
            calibration,
            pending_fault: None,
        }
    }
}

impl SensorTransport for SimSensor {
    fn start_conversion(&mut self) {}

    fn collect(&mut self) -> Result<Reading, SensorFault> {
        let raw_temperature = sht::raw_temperature_for(self.climate.temperature_centi_c);
        let raw_humidity =
            sht::raw_humidity_for(ShtVariant::Shtc3, self.climate.humidity_centi_pct);
        let frame = match self.pending_fault.take() {
            None => sht::encode_frame(raw_temperature, raw_humidity),
            Some(SensorFault::Checksum) => {
                let mut frame = sht::encode_frame(raw_temperature, raw_humidity);
                frame[2] ^= 0x01;
                frame
            }
            Some(SensorFault::InvalidData) => sht::encode_frame(0xFFFF, raw_humidity),
            Some(SensorFault::Bus) => return Err(SensorFault::Bus),
        };
        sht::decode_frame(ShtVariant::Shtc3, &frame, self.calibration)
    }

    fn reset(&mut self) {}
}

#[derive(Default)]
struct SimDisplay {
    refreshes: u32,
    pending: Vec<String>,
}

impl Display for SimDisplay {
    fn notify_new_reading(&mut self, _reading: Reading) {}

    fn request_refresh(&mut self, layout: Layout, screen: &Screen) {
        self.refreshes += 1;
        self.pending
            .push(format!("display {} {}", layout.label(), render_screen(layout, screen)));
    }
}

#[derive(Default)]
struct SimRadio {
    connected: bool,
    pending: bool,
    notifications: u32,
}

impl Radio for SimRadio {
    fn link_allows_notification(&self) -> bool {
        self.connected
    }

    fn notify_new_reading(&mut self, _reading: Reading) {
        self.notifications += 1;
    }

    fn has_pending_traffic(&self) -> bool {
        self.pending
    }
}

#[derive(Default)]
struct SimButton {
    pressed: bool,
}

impl ButtonInput for SimButton {
    fn is_pressed(&self) -> bool {
        self.pressed
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# Sensor node emulator transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since power-up"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>8} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                let topics: Vec<&str> = HELP_TOPICS.iter().map(|(name, _)| *name).collect();
                lines.push(format!("Available topics: {}", topics.join(", ")));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn render_screen(layout: Layout, screen: &Screen) -> String {
    let mut text = if layout == Layout::Clock {
        let hours = screen.big_x10.unwrap_or(0) / 10;
        let minutes = screen.small_x10.unwrap_or(0) / 10;
        format!("{hours:02}:{minutes:02}")
    } else {
        let unit = match screen.symbol {
            TemperatureSymbol::Blank => "",
            TemperatureSymbol::Celsius => "C",
            TemperatureSymbol::Fahrenheit => "F",
            TemperatureSymbol::Equals => "=",
        };
        let mut text = format!("{}{unit}", format_tenths(screen.big_x10));
        if screen.small_x10.is_some() {
            text.push(' ');
            text.push_str(&format_tenths(screen.small_x10));
            if screen.percent {
                text.push('%');
            }
        }
        text
    };

    if screen.battery {
        text.push_str(" [bat]");
    }
    if screen.link {
        text.push_str(" [link]");
    }
    text
}

fn format_tenths(value: Option<i16>) -> String {
    match value {
        Some(value) => {
            let sign = if value < 0 { "-" } else { "" };
            let abs = value.unsigned_abs();
            format!("{sign}{}.{}", abs / 10, abs % 10)
        }
        None => "--.-".to_string(),
    }
}

fn format_micros(micros: u64) -> String {
    format!("{}.{:03}s", micros / 1_000_000, (micros / 1_000) % 1_000)
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
