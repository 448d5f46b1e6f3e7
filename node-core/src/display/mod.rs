//! Display layout policy and the display collaborator interface.
//!
//! Segment encoding and the bus transport belong to the display driver. This
//! module only decides *what* the screen shows: which [`Layout`] is active
//! and which numbers and symbols that layout carries.

use crate::sensor::Reading;

/// Seconds each rotating layout stays on screen.
pub const LAYOUT_DWELL_SECS: u32 = 5;

/// Screen arrangement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Layout {
    /// Numbers pushed by a connected client, shown while the overlay is valid.
    ExtData,
    /// Temperature with the battery indicator.
    TempBattery,
    /// Temperature and humidity.
    TempHumidity,
    /// Elapsed hours and minutes.
    Clock,
}

impl Layout {
    /// Short label used in logs and transcripts.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Layout::ExtData => "ext-data",
            Layout::TempBattery => "temp-battery",
            Layout::TempHumidity => "temp-humidity",
            Layout::Clock => "clock",
        }
    }
}

/// Which optional layouts take part in the rotation.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DisplayOptions {
    pub fahrenheit: bool,
    pub show_battery: bool,
    pub show_clock: bool,
}

impl DisplayOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fahrenheit: false,
            show_battery: false,
            show_clock: false,
        }
    }
}

/// Unit symbol next to the big number.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TemperatureSymbol {
    #[default]
    Blank,
    Celsius,
    Fahrenheit,
    Equals,
}

/// Numbers pushed by a client for temporary display.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ExternalData {
    /// Big number in tenths.
    pub big_x10: i16,
    /// Small number in tenths.
    pub small_x10: i16,
    pub symbol: TemperatureSymbol,
    pub percent: bool,
    pub battery: bool,
    /// How long the overlay stays valid.
    pub valid_for_secs: u32,
}

/// External data plus the second at which it stops being shown.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ExternalOverlay {
    data: Option<ExternalData>,
    expires_at_sec: u32,
}

impl ExternalOverlay {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: None,
            expires_at_sec: 0,
        }
    }

    /// Shows `data` from `now_sec` for `data.valid_for_secs` seconds.
    pub fn show(&mut self, data: ExternalData, now_sec: u32) {
        self.expires_at_sec = now_sec.wrapping_add(data.valid_for_secs);
        self.data = Some(data);
    }

    /// Drops the overlay immediately.
    pub fn clear(&mut self) {
        self.data = None;
    }

    /// Seconds the overlay remains valid at `now_sec`; zero once expired.
    #[must_use]
    pub fn remaining_secs(&self, now_sec: u32) -> u32 {
        match self.data {
            Some(_) => {
                let remaining = self.expires_at_sec.wrapping_sub(now_sec);
                let valid_for = self.data.map_or(0, |data| data.valid_for_secs);
                if remaining <= valid_for { remaining } else { 0 }
            }
            None => 0,
        }
    }

    #[must_use]
    pub const fn data(&self) -> Option<ExternalData> {
        self.data
    }
}

/// Picks the layout for the next refresh.
///
/// A live overlay always wins. Otherwise the enabled layouts rotate every
/// [`LAYOUT_DWELL_SECS`] seconds, starting `offset` positions further along.
#[must_use]
pub fn select_layout(
    options: DisplayOptions,
    overlay_remaining_secs: u32,
    elapsed_secs: u32,
    offset: u8,
) -> Layout {
    if overlay_remaining_secs > 0 {
        return Layout::ExtData;
    }

    let mut rotation = [Layout::TempHumidity; 3];
    let mut count = 1;
    if options.show_battery {
        rotation[count] = Layout::TempBattery;
        count += 1;
    }
    if options.show_clock {
        rotation[count] = Layout::Clock;
        count += 1;
    }

    let slot = (elapsed_secs / LAYOUT_DWELL_SECS).wrapping_add(u32::from(offset));
    // `count` is at most 3, so both conversions are lossless.
    let index = slot % u32::try_from(count).unwrap_or(1);
    rotation[usize::try_from(index).unwrap_or(0)]
}

/// Logical content of one refresh.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Screen {
    /// Big number in tenths, `None` for blank.
    pub big_x10: Option<i16>,
    /// Small number in tenths, `None` for blank.
    pub small_x10: Option<i16>,
    pub symbol: TemperatureSymbol,
    pub percent: bool,
    pub battery: bool,
    pub link: bool,
}

/// Inputs for [`compose_screen`].
#[derive(Copy, Clone, Debug, Default)]
pub struct ScreenInputs {
    pub reading: Option<Reading>,
    pub overlay: Option<ExternalData>,
    pub elapsed_secs: u32,
    pub link: bool,
}

/// Fills in the numbers and symbols `layout` shows.
#[must_use]
pub fn compose_screen(layout: Layout, options: DisplayOptions, inputs: ScreenInputs) -> Screen {
    let temperature = inputs.reading.map(|reading| {
        if options.fahrenheit {
            fahrenheit_x10(reading.temperature_centi_c)
        } else {
            reading.temperature_deci_c()
        }
    });
    let unit = if options.fahrenheit {
        TemperatureSymbol::Fahrenheit
    } else {
        TemperatureSymbol::Celsius
    };

    match layout {
        Layout::ExtData => {
            let data = inputs.overlay.unwrap_or_default();
            Screen {
                big_x10: Some(data.big_x10),
                small_x10: Some(data.small_x10),
                symbol: data.symbol,
                percent: data.percent,
                battery: data.battery,
                link: inputs.link,
            }
        }
        Layout::TempHumidity => Screen {
            big_x10: temperature,
            small_x10: inputs
                .reading
                .map(|reading| i16::try_from(reading.humidity_deci_pct()).unwrap_or(999)),
            symbol: unit,
            percent: true,
            battery: false,
            link: inputs.link,
        },
        Layout::TempBattery => Screen {
            big_x10: temperature,
            small_x10: None,
            symbol: unit,
            percent: false,
            battery: true,
            link: inputs.link,
        },
        Layout::Clock => {
            let minutes = inputs.elapsed_secs / 60;
            let hours = i16::try_from((minutes / 60) % 100).unwrap_or(0);
            let minutes = i16::try_from(minutes % 60).unwrap_or(0);
            Screen {
                big_x10: Some(hours * 10),
                small_x10: Some(minutes * 10),
                symbol: TemperatureSymbol::Blank,
                percent: false,
                battery: false,
                link: inputs.link,
            }
        }
    }
}

/// Converts hundredths of a degree Celsius to tenths of a degree Fahrenheit.
#[must_use]
pub fn fahrenheit_x10(centi_c: i16) -> i16 {
    let deci_f = ((i32::from(centi_c) / 5) * 9 + 3_200) / 10;
    i16::try_from(deci_f).unwrap_or(i16::MAX)
}

/// Display driver as seen by the main loop.
pub trait Display {
    /// A fresh reading is available.
    fn notify_new_reading(&mut self, reading: Reading);

    /// Render `screen` and flush it to the panel.
    fn request_refresh(&mut self, layout: Layout, screen: &Screen);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_wins_while_it_is_valid() {
        let options = DisplayOptions {
            show_clock: true,
            ..DisplayOptions::new()
        };
        assert_eq!(select_layout(options, 3, 0, 0), Layout::ExtData);
        assert_eq!(select_layout(options, 0, 0, 0), Layout::TempHumidity);
    }

    #[test]
    fn enabled_layouts_rotate_with_elapsed_time() {
        let options = DisplayOptions {
            show_battery: true,
            show_clock: true,
            ..DisplayOptions::new()
        };
        assert_eq!(select_layout(options, 0, 0, 0), Layout::TempHumidity);
        assert_eq!(select_layout(options, 0, 5, 0), Layout::TempBattery);
        assert_eq!(select_layout(options, 0, 10, 0), Layout::Clock);
        assert_eq!(select_layout(options, 0, 15, 0), Layout::TempHumidity);
        assert_eq!(select_layout(options, 0, 0, 2), Layout::Clock);
    }

    #[test]
    fn without_options_the_layout_never_changes() {
        for elapsed in [0, 5, 10, 1_000] {
            assert_eq!(
                select_layout(DisplayOptions::new(), 0, elapsed, 7),
                Layout::TempHumidity
            );
        }
    }

    #[test]
    fn overlay_expires_after_its_validity_window() {
        let mut overlay = ExternalOverlay::new();
        assert_eq!(overlay.remaining_secs(0), 0);

        overlay.show(
            ExternalData {
                big_x10: 123,
                valid_for_secs: 600,
                ..ExternalData::default()
            },
            100,
        );
        assert_eq!(overlay.remaining_secs(100), 600);
        assert_eq!(overlay.remaining_secs(699), 1);
        assert_eq!(overlay.remaining_secs(700), 0);
        assert_eq!(overlay.remaining_secs(5_000), 0);

        overlay.clear();
        assert_eq!(overlay.data(), None);
    }

    #[test]
    fn temperature_humidity_screen_uses_the_configured_unit() {
        let inputs = ScreenInputs {
            reading: Some(Reading::new(2_150, 4_500)),
            ..ScreenInputs::default()
        };
        let celsius = compose_screen(Layout::TempHumidity, DisplayOptions::new(), inputs);
        assert_eq!(celsius.big_x10, Some(215));
        assert_eq!(celsius.small_x10, Some(450));
        assert_eq!(celsius.symbol, TemperatureSymbol::Celsius);

        let options = DisplayOptions {
            fahrenheit: true,
            ..DisplayOptions::new()
        };
        let fahrenheit = compose_screen(Layout::TempHumidity, options, inputs);
        assert_eq!(fahrenheit.big_x10, Some(707));
        assert_eq!(fahrenheit.symbol, TemperatureSymbol::Fahrenheit);
    }

    #[test]
    fn clock_screen_shows_hours_and_minutes() {
        let inputs = ScreenInputs {
            elapsed_secs: 2 * 3_600 + 34 * 60 + 59,
            ..ScreenInputs::default()
        };
        let screen = compose_screen(Layout::Clock, DisplayOptions::new(), inputs);
        assert_eq!(screen.big_x10, Some(20));
        assert_eq!(screen.small_x10, Some(340));
    }

    #[test]
    fn humidity_tenths_round_half_up() {
        let shown = |centi_pct| {
            let inputs = ScreenInputs {
                reading: Some(Reading::new(2_000, centi_pct)),
                ..ScreenInputs::default()
            };
            compose_screen(Layout::TempHumidity, DisplayOptions::new(), inputs).small_x10
        };
        assert_eq!(shown(4_541), Some(454));
        assert_eq!(shown(4_545), Some(455));
        assert_eq!(shown(9_999), Some(1_000));
    }

    #[test]
    fn screens_are_blank_before_the_first_reading() {
        let screen = compose_screen(
            Layout::TempHumidity,
            DisplayOptions::new(),
            ScreenInputs::default(),
        );
        assert_eq!(screen.big_x10, None);
        assert_eq!(screen.small_x10, None);
    }
}
