//! SHTC3 transport on top of the `shtcx` driver.
//!
//! Conversions are started in normal mode without clock stretching, so the
//! bus is free while the sensor measures. The loop comes back once the
//! conversion time has passed and reads the result; the sensor is put back
//! to sleep after every read.

use embassy_stm32::i2c::I2c;
use embassy_stm32::mode::Blocking;
use embassy_time::Delay;
use node_core::sensor::sht::{self, Calibration, ShtVariant};
use node_core::sensor::{Reading, SensorFault, SensorTransport};
use shtcx::sensor_class::Sht2Gen;
use shtcx::{LowPower, PowerMode, ShtCx};

pub struct Shtc3<'d> {
    sht: ShtCx<Sht2Gen, I2c<'d, Blocking>>,
    calibration: Calibration,
}

impl<'d> Shtc3<'d> {
    pub fn new(bus: I2c<'d, Blocking>, calibration: Calibration) -> Self {
        let mut sht = shtcx::shtc3(bus);
        if let Err(error) = sht.sleep() {
            defmt::warn!("sht: initial sleep failed: {}", defmt::Debug2Format(&error));
        }
        Self { sht, calibration }
    }
}

impl SensorTransport for Shtc3<'_> {
    fn start_conversion(&mut self) {
        if let Err(error) = self.sht.wakeup(&mut Delay) {
            defmt::warn!("sht: wake-up failed: {}", defmt::Debug2Format(&error));
            return;
        }
        if let Err(error) = self.sht.start_measurement(PowerMode::NormalMode) {
            defmt::warn!("sht: measure command failed: {}", defmt::Debug2Format(&error));
        }
    }

    fn collect(&mut self) -> Result<Reading, SensorFault> {
        let raw = self.sht.get_raw_measurement_result().map_err(|error| {
            if matches!(error, shtcx::Error::Crc) {
                SensorFault::Checksum
            } else {
                SensorFault::Bus
            }
        });
        if let Err(error) = self.sht.sleep() {
            defmt::warn!("sht: sleep command failed: {}", defmt::Debug2Format(&error));
        }
        let raw = raw?;
        sht::convert_raw(
            ShtVariant::Shtc3,
            raw.temperature,
            raw.humidity,
            self.calibration,
        )
    }

    fn reset(&mut self) {
        // A sleeping sensor ignores the reset command.
        let _ = self.sht.wakeup(&mut Delay);
        if let Err(error) = self.sht.reset(&mut Delay) {
            defmt::warn!("sht: soft reset failed: {}", defmt::Debug2Format(&error));
        }
    }
}
