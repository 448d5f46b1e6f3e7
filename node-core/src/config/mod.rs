//! Node configuration as the scheduling core consumes it.
//!
//! The persisted layout and the command protocol that edits these values live
//! outside the core. What arrives here is already sanitised by
//! [`NodeConfig::sanitized`], so every cadence the loop derives is strictly
//! positive and fits the virtual-clock horizon.

use crate::display::DisplayOptions;
use crate::sensor::AcquisitionTiming;
use crate::sensor::sht::{Calibration, SHTC3_CONVERSION_US};

/// Unit of the advertising interval, in microseconds (62.5 ms).
pub const ADVERTISING_UNIT_US: u32 = 62_500;
/// Unit of the display step, in microseconds (50 ms).
pub const DISPLAY_STEP_UNIT_US: u32 = 50_000;

/// Shortest advertising interval, in units.
pub const ADVERTISING_INTERVAL_MIN: u8 = 1;
/// Longest advertising interval, in units (10 s).
pub const ADVERTISING_INTERVAL_MAX: u8 = 160;
/// Smallest measure multiplier.
pub const MEASURE_INTERVAL_MIN: u8 = 1;
/// Largest measure multiplier (250 s at the longest advertising interval).
pub const MEASURE_INTERVAL_MAX: u8 = 25;
/// Shortest display step, in units (0.5 s).
pub const DISPLAY_STEP_MIN: u8 = 10;

/// Default lost-wake detection margin beyond the conversion time.
pub const DEFAULT_OVERDUE_MARGIN_US: u32 = 50_000;

/// Cadence and presentation settings for one node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeConfig {
    /// Advertising interval in 62.5 ms units.
    pub advertising_interval: u8,
    /// Sampling interval as a multiple of the advertising interval.
    pub measure_interval: u8,
    /// Display refresh step in 50 ms units.
    pub display_step: u8,
    /// Sensor conversion time in microseconds.
    pub conversion_time_us: u32,
    /// Extra slack before an outstanding conversion counts as a lost wake.
    pub overdue_margin_us: u32,
    /// Offsets applied to raw sensor values.
    pub calibration: Calibration,
    /// Which display layouts are enabled.
    pub display: DisplayOptions,
}

impl NodeConfig {
    /// Factory defaults: 10 s sampling, 2.45 s display refresh, 11 ms conversion.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            advertising_interval: 40,
            measure_interval: 4,
            display_step: 49,
            conversion_time_us: SHTC3_CONVERSION_US,
            overdue_margin_us: DEFAULT_OVERDUE_MARGIN_US,
            calibration: Calibration {
                temperature_offset_deci_c: 0,
                humidity_offset_deci_pct: 0,
            },
            display: DisplayOptions::new(),
        }
    }

    /// Returns a copy with every field clamped to its supported range.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.advertising_interval = self
            .advertising_interval
            .clamp(ADVERTISING_INTERVAL_MIN, ADVERTISING_INTERVAL_MAX);
        self.measure_interval = self
            .measure_interval
            .clamp(MEASURE_INTERVAL_MIN, MEASURE_INTERVAL_MAX);
        self.display_step = self.display_step.max(DISPLAY_STEP_MIN);
        self.conversion_time_us = self.conversion_time_us.max(1);
        self
    }

    /// Distance between conversion starts, in microseconds.
    #[must_use]
    pub fn sampling_interval_us(&self) -> u32 {
        ADVERTISING_UNIT_US
            * u32::from(self.advertising_interval)
            * u32::from(self.measure_interval)
    }

    /// Distance between display refreshes, in microseconds.
    #[must_use]
    pub fn display_interval_us(&self) -> u32 {
        DISPLAY_STEP_UNIT_US * u32::from(self.display_step)
    }

    /// Timing handed to the acquisition state machine.
    #[must_use]
    pub fn acquisition_timing(&self) -> AcquisitionTiming {
        AcquisitionTiming {
            sampling_interval_us: self.sampling_interval_us(),
            conversion_time_us: self.conversion_time_us,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_factory_cadence() {
        let config = NodeConfig::default();
        assert_eq!(config.sampling_interval_us(), 10_000_000);
        assert_eq!(config.display_interval_us(), 2_450_000);
        assert_eq!(config.conversion_time_us, 11_000);
    }

    #[test]
    fn zero_values_are_raised_to_the_minimum() {
        let config = NodeConfig {
            advertising_interval: 0,
            measure_interval: 0,
            display_step: 0,
            conversion_time_us: 0,
            ..NodeConfig::new()
        }
        .sanitized();

        assert_eq!(config.advertising_interval, 1);
        assert_eq!(config.measure_interval, 1);
        assert_eq!(config.display_step, 10);
        assert_eq!(config.sampling_interval_us(), 62_500);
        assert_eq!(config.display_interval_us(), 500_000);
        assert_eq!(config.conversion_time_us, 1);
    }

    #[test]
    fn large_values_are_capped() {
        let config = NodeConfig {
            advertising_interval: 255,
            measure_interval: 200,
            ..NodeConfig::new()
        }
        .sanitized();

        assert_eq!(config.advertising_interval, 160);
        assert_eq!(config.measure_interval, 25);
        assert_eq!(config.sampling_interval_us(), 250_000_000);
    }
}
