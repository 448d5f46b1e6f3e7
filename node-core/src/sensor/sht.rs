//! Frame codec for Sensirion SHTC3 and SHT4x humidity sensors.
//!
//! Both parts return six bytes per measurement: a big-endian temperature word,
//! its CRC-8, a big-endian humidity word and its CRC-8. The conversion
//! formulas are the datasheet ones in integer form, producing hundredths of a
//! degree and hundredths of a percent.

use super::{Reading, SensorFault};

/// CRC-8 polynomial x^8 + x^5 + x^4 + 1.
pub const CRC_POLYNOMIAL: u8 = 0x31;
/// CRC-8 initial value.
pub const CRC_INIT: u8 = 0xFF;
/// Bytes per measurement frame.
pub const FRAME_LEN: usize = 6;

/// SHTC3 worst-case conversion time in microseconds.
pub const SHTC3_CONVERSION_US: u32 = 11_000;

/// SHT4x worst-case high-repeatability conversion time in microseconds.
pub const SHT4X_CONVERSION_US: u32 = 8_200;

/// Raw temperature word the sensor uses to flag an invalid conversion.
const INVALID_RAW: u16 = 0xFFFF;
/// Upper bound of the humidity output in hundredths of a percent.
const HUMIDITY_MAX: i32 = 9_999;

/// Supported sensor parts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShtVariant {
    Shtc3,
    Sht4x,
}

impl ShtVariant {
    /// Worst-case conversion time of the part.
    #[must_use]
    pub const fn conversion_time_us(self) -> u32 {
        match self {
            ShtVariant::Shtc3 => SHTC3_CONVERSION_US,
            ShtVariant::Sht4x => SHT4X_CONVERSION_US,
        }
    }
}

/// User calibration applied on top of the datasheet conversion.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Calibration {
    /// Temperature offset in tenths of a degree.
    pub temperature_offset_deci_c: i8,
    /// Humidity offset in tenths of a percent.
    pub humidity_offset_deci_pct: i8,
}

/// Computes the Sensirion CRC-8 over `data`.
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRC_INIT;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC_POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Validates a raw frame and converts it into a [`Reading`].
///
/// # Errors
///
/// Returns [`SensorFault::Checksum`] when either CRC byte is wrong and
/// [`SensorFault::InvalidData`] when the sensor flagged the conversion invalid.
pub fn decode_frame(
    variant: ShtVariant,
    frame: &[u8; FRAME_LEN],
    calibration: Calibration,
) -> Result<Reading, SensorFault> {
    if crc8(&frame[0..2]) != frame[2] || crc8(&frame[3..5]) != frame[5] {
        return Err(SensorFault::Checksum);
    }

    let raw_temperature = u16::from_be_bytes([frame[0], frame[1]]);
    let raw_humidity = u16::from_be_bytes([frame[3], frame[4]]);
    convert_raw(variant, raw_temperature, raw_humidity, calibration)
}

/// Converts CRC-checked raw words into a calibrated [`Reading`].
///
/// # Errors
///
/// Returns [`SensorFault::InvalidData`] when the sensor flagged the
/// conversion invalid or the temperature leaves the representable range.
pub fn convert_raw(
    variant: ShtVariant,
    raw_temperature: u16,
    raw_humidity: u16,
    calibration: Calibration,
) -> Result<Reading, SensorFault> {
    if raw_temperature == INVALID_RAW {
        return Err(SensorFault::InvalidData);
    }

    let temperature = ((17_500 * i32::from(raw_temperature)) >> 16) - 4_500
        + i32::from(calibration.temperature_offset_deci_c) * 10;
    let humidity = match variant {
        ShtVariant::Shtc3 => (10_000 * i32::from(raw_humidity)) >> 16,
        ShtVariant::Sht4x => ((12_500 * i32::from(raw_humidity)) >> 16) - 600,
    } + i32::from(calibration.humidity_offset_deci_pct) * 10;

    let temperature = i16::try_from(temperature).map_err(|_| SensorFault::InvalidData)?;
    let humidity = u16::try_from(humidity.clamp(0, HUMIDITY_MAX)).unwrap_or(0);
    Ok(Reading::new(temperature, humidity))
}

/// Builds a frame carrying the given raw words with valid CRCs.
#[must_use]
pub fn encode_frame(raw_temperature: u16, raw_humidity: u16) -> [u8; FRAME_LEN] {
    let [t_hi, t_lo] = raw_temperature.to_be_bytes();
    let [h_hi, h_lo] = raw_humidity.to_be_bytes();
    [
        t_hi,
        t_lo,
        crc8(&[t_hi, t_lo]),
        h_hi,
        h_lo,
        crc8(&[h_hi, h_lo]),
    ]
}

/// Inverse of the temperature conversion, rounded up so decoding is exact.
#[must_use]
pub fn raw_temperature_for(centi_c: i16) -> u16 {
    let scaled = ((i32::from(centi_c) + 4_500) << 16) + 17_499;
    u16::try_from((scaled / 17_500).clamp(0, 0xFFFE)).unwrap_or(0)
}

/// Inverse of the humidity conversion for `variant`, rounded up.
#[must_use]
pub fn raw_humidity_for(variant: ShtVariant, centi_pct: u16) -> u16 {
    let value = i32::from(centi_pct);
    let raw = match variant {
        ShtVariant::Shtc3 => ((value << 16) + 9_999) / 10_000,
        ShtVariant::Sht4x => (((value + 600) << 16) + 12_499) / 12_500,
    };
    u16::try_from(raw.clamp(0, 0xFFFF)).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_the_datasheet_example() {
        // Sensirion reference: CRC(0xBEEF) = 0x92.
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn decodes_a_valid_shtc3_frame() {
        let frame = encode_frame(0x6666, 0x8000);
        let reading = decode_frame(ShtVariant::Shtc3, &frame, Calibration::default()).unwrap();
        // 17500 * 0x6666 >> 16 = 6999 -> 24.99 C; 10000 * 0x8000 >> 16 = 5000.
        assert_eq!(reading, Reading::new(2_499, 5_000));
    }

    #[test]
    fn sht4x_humidity_is_offset_and_clamped() {
        let frame = encode_frame(0x6666, 0x0000);
        let reading = decode_frame(ShtVariant::Sht4x, &frame, Calibration::default()).unwrap();
        assert_eq!(reading.humidity_centi_pct, 0);

        let frame = encode_frame(0x6666, 0xFFFF);
        let reading = decode_frame(ShtVariant::Sht4x, &frame, Calibration::default()).unwrap();
        assert_eq!(reading.humidity_centi_pct, 9_999);
    }

    #[test]
    fn calibration_offsets_apply_in_tenths() {
        let frame = encode_frame(0x6666, 0x8000);
        let calibration = Calibration {
            temperature_offset_deci_c: -12,
            humidity_offset_deci_pct: 5,
        };
        let reading = decode_frame(ShtVariant::Shtc3, &frame, calibration).unwrap();
        assert_eq!(reading, Reading::new(2_379, 5_050));
    }

    #[test]
    fn corrupted_crc_is_a_checksum_fault() {
        let mut frame = encode_frame(0x6666, 0x8000);
        frame[5] ^= 0x01;
        assert_eq!(
            decode_frame(ShtVariant::Shtc3, &frame, Calibration::default()),
            Err(SensorFault::Checksum)
        );
    }

    #[test]
    fn all_ones_temperature_is_invalid() {
        let frame = encode_frame(0xFFFF, 0x8000);
        assert_eq!(
            decode_frame(ShtVariant::Shtc3, &frame, Calibration::default()),
            Err(SensorFault::InvalidData)
        );
    }

    #[test]
    fn raw_words_convert_like_a_decoded_frame() {
        let calibration = Calibration {
            temperature_offset_deci_c: 3,
            humidity_offset_deci_pct: -4,
        };
        let frame = encode_frame(0x6666, 0x8000);
        assert_eq!(
            convert_raw(ShtVariant::Shtc3, 0x6666, 0x8000, calibration),
            decode_frame(ShtVariant::Shtc3, &frame, calibration)
        );
        assert_eq!(
            convert_raw(ShtVariant::Shtc3, 0xFFFF, 0x8000, calibration),
            Err(SensorFault::InvalidData)
        );
    }

    #[test]
    fn inverse_conversions_decode_back_to_the_target() {
        for (centi_c, centi_pct) in [(2_150, 4_500), (-1_000, 9_000), (0, 0)] {
            let frame = encode_frame(
                raw_temperature_for(centi_c),
                raw_humidity_for(ShtVariant::Shtc3, centi_pct),
            );
            let reading =
                decode_frame(ShtVariant::Shtc3, &frame, Calibration::default()).unwrap();
            assert_eq!(reading, Reading::new(centi_c, centi_pct));
        }
    }
}
