//! Implements a driver for reading a BMP180 barometric pressure and
//! temperature sensor.
//!
//! The library is built to work with [`embedded-hal`] and talks to the sensor
//! through a small [`Transport`] abstraction, so it can run on a micro
//! controller as well as on a Linux board via `/dev/i2c-*`. The compensation
//! algorithm is implemented as per the [datasheet definition][bmp180] using the
//! same fixed-point arithmetic, so the results match the manufacturer's
//! reference code bit for bit. Altitude is estimated from the compensated
//! pressure with the international barometric formula.
//!
//! [bmp180]: https://cdn-shop.adafruit.com/datasheets/BST-BMP180-DS000-09.pdf
//! [`embedded-hal`]: https://docs.rs/embedded-hal
//!
//! # Usage
//!
//! Provide something that can delay execution by a number of microseconds and
//! the I2C bus the sensor is connected to. The calibration block is read once
//! when the session is created:
//!
//! ```ignore
//! let transport = bmp180_baro::I2cTransport::new(i2c);
//! let mut bmp180 = bmp180_baro::Session::new(transport, delay, Oversampling::UltraHighResolution)?;
//! let reading = bmp180.measure()?;
//! println!("{:.2} C, {} Pa", reading.celsius(), reading.pressure);
//! ```
//!
//! The compensation functions are exported as well and may be used on raw
//! values obtained by other means.
#![cfg_attr(not(test), no_std)]

use embedded_hal::blocking::delay::DelayUs;
use log::{debug, trace, warn};

pub mod error;
pub mod transport;

pub use error::{DomainError, Error, Result, SensorFault};
pub use transport::{I2cTransport, Transport, BMP180_ADDR};

/// Value of the chip-id register on a BMP180.
pub const BMP180_CHIP_ID: u8 = 0x55;

/// Standard atmospheric pressure at sea level, in pascals.
pub const SEA_LEVEL_PRESSURE_PA: f32 = 101_325.0;

/// Register holding the chip id.
const BMP180_CHIP_ID_REGISTER: u8 = 0xD0;

/// Register of the first calibration word (AC1). The remaining words follow
/// at consecutive even addresses up to 0xBE (MD).
const BMP180_CALIBRATION_ADDRESS_0: u8 = 0xAA;

/// Number of calibration coefficients in EEPROM.
const BMP180_COEFFICIENT_COUNT: usize = 11;

/// Measurement control register.
const BMP180_CONTROL_REGISTER: u8 = 0xF4;

/// Conversion result register, MSB first.
const BMP180_RESULT_REGISTER: u8 = 0xF6;

/// BMP180 command to start a temperature conversion.
const BMP180_START_TEMPERATURE_CONVERSION: u8 = 0x2E;

/// BMP180 command to start a pressure conversion, before adding the
/// oversampling setting in bits 6-7.
const BMP180_START_PRESSURE_CONVERSION: u8 = 0x34;

/// Wait after starting a temperature conversion. The datasheet maximum is
/// 4.5 ms.
const BMP180_TEMPERATURE_CONVERSION_TIME_US: u32 = 5_000;

/// Calibration coefficients stored in EEPROM.
///
/// Field names follow the datasheet. The block is read once per session and
/// never changes afterwards.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CalibrationCoefficients {
    pub ac1: i16,
    pub ac2: i16,
    pub ac3: i16,
    pub ac4: u16,
    pub ac5: u16,
    pub ac6: u16,
    pub b1: i16,
    pub b2: i16,
    pub mb: i16,
    pub mc: i16,
    pub md: i16,
}

impl CalibrationCoefficients {
    /// Reads all eleven calibration words from the sensor.
    ///
    /// Either every word is read and passes the datasheet communication check
    /// (no word is `0x0000` or `0xFFFF`), or an error is returned and no
    /// coefficients exist.
    pub fn load<T: Transport>(transport: &mut T) -> Result<Self, T::Error> {
        let mut words = [0_u16; BMP180_COEFFICIENT_COUNT];
        for (idx, word) in words.iter_mut().enumerate() {
            let register = BMP180_CALIBRATION_ADDRESS_0 + idx as u8 * 2;
            let value = transport.read_word(register).map_err(Error::Transport)?;

            if value == 0x0000 || value == 0xFFFF {
                warn!("calibration register {:#04x} read back as {:#06x}", register, value);
                return Err(Error::InvalidCalibration { register });
            }

            *word = value;
        }

        let coeffs = Self::from_words(&words);
        debug!("calibration loaded: {:?}", coeffs);
        Ok(coeffs)
    }

    /// Interprets the raw EEPROM words in register order AC1..MD. AC4-AC6 are
    /// unsigned, all others two's-complement.
    pub fn from_words(words: &[u16; BMP180_COEFFICIENT_COUNT]) -> Self {
        Self {
            ac1: words[0] as i16,
            ac2: words[1] as i16,
            ac3: words[2] as i16,
            ac4: words[3],
            ac5: words[4],
            ac6: words[5],
            b1: words[6] as i16,
            b2: words[7] as i16,
            mb: words[8] as i16,
            mc: words[9] as i16,
            md: words[10] as i16,
        }
    }
}

/// Pressure oversampling setting, where a higher setting means longer
/// conversion time and more bits in the raw pressure value.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum Oversampling {
    /// 1 sample, 16 bit raw pressure, max. conversion time 4.5 ms.
    UltraLowPower = 0,
    /// 2 samples, 17 bit raw pressure, max. conversion time 7.5 ms.
    Standard = 1,
    /// 4 samples, 18 bit raw pressure, max. conversion time 13.5 ms.
    HighResolution = 2,
    /// 8 samples, 19 bit raw pressure, max. conversion time 25.5 ms.
    #[default]
    UltraHighResolution = 3,
}

impl Oversampling {
    /// Gets the setting `oss` as used by the datasheet formulas.
    pub fn setting(self) -> u8 {
        self as u8
    }

    /// Looks up the oversampling for a setting in `0..=3`.
    pub fn from_setting(oss: u8) -> Option<Self> {
        match oss {
            0 => Some(Oversampling::UltraLowPower),
            1 => Some(Oversampling::Standard),
            2 => Some(Oversampling::HighResolution),
            3 => Some(Oversampling::UltraHighResolution),
            _ => None,
        }
    }

    /// Control byte starting a pressure conversion with this setting.
    fn pressure_command(self) -> u8 {
        BMP180_START_PRESSURE_CONVERSION + (self.setting() << 6)
    }

    /// Number of unused low bits in the 24-bit pressure result.
    fn padding_bits(self) -> u8 {
        8 - self.setting()
    }
}

/// Wait applied after starting a pressure conversion, computed as
/// `base_us + (factor_us << oss)` microseconds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConversionTiming {
    pub base_us: u32,
    pub factor_us: u32,
}

impl ConversionTiming {
    /// 3.002 / 6.002 / 12.002 / 24.002 ms.
    ///
    /// Note: This is shorter than the datasheet maximum for every setting.
    pub const COMPAT: Self = Self {
        base_us: 2,
        factor_us: 3_000,
    };

    /// 4.5 / 7.5 / 13.5 / 25.5 ms, the maximum conversion times from the
    /// datasheet.
    pub const DATASHEET: Self = Self {
        base_us: 1_500,
        factor_us: 3_000,
    };

    /// Gets the pressure conversion time in microseconds, saturating at
    /// `u32::MAX`.
    pub fn pressure_conversion_time_us(&self, oversampling: Oversampling) -> u32 {
        self.factor_us
            .saturating_mul(1 << oversampling.setting())
            .saturating_add(self.base_us)
    }
}

impl Default for ConversionTiming {
    fn default() -> Self {
        Self::COMPAT
    }
}

/// Temperature correction term produced by temperature compensation.
///
/// Pressure compensation needs the `B5` of the same measurement cycle, so the
/// only way to obtain one is [`compensate_temperature`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct B5(i32);

impl B5 {
    /// Raw value of the term.
    pub fn value(self) -> i32 {
        self.0
    }
}

/// Result of temperature compensation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Temperature {
    /// Temperature in tenths of a degree Celsius.
    deci_celsius: i32,

    /// Correction term for pressure compensation in the same cycle.
    b5: B5,
}

impl Temperature {
    /// Temperature in 0.1 °C steps, as computed by the sensor's algorithm.
    pub fn deci_celsius(&self) -> i32 {
        self.deci_celsius
    }

    /// Temperature in degrees Celsius.
    pub fn celsius(&self) -> f32 {
        self.deci_celsius as f32 / 10.0
    }

    /// Correction term to pass on to [`compensate_pressure`].
    pub fn b5(&self) -> B5 {
        self.b5
    }
}

/// Represents one compensated reading from the sensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Reading {
    /// Compensated temperature.
    pub temperature: Temperature,

    /// Compensated pressure in pascals.
    pub pressure: i32,
}

impl Reading {
    /// Temperature in degrees Celsius.
    pub fn celsius(&self) -> f32 {
        self.temperature.celsius()
    }

    /// Pressure in hectopascals (millibar).
    pub fn pressure_hpa(&self) -> f32 {
        self.pressure as f32 / 100.0
    }

    /// Altitude in meters above the standard sea level pressure.
    pub fn altitude(&self) -> core::result::Result<f32, DomainError> {
        checked_altitude(self.pressure)
    }

    /// Altitude in meters relative to a locally known sea level pressure.
    pub fn altitude_relative_to(
        &self,
        sea_level_pa: f32,
    ) -> core::result::Result<f32, DomainError> {
        check_altitude(self.pressure, altitude_with_reference(self.pressure, sea_level_pa))
    }
}

/// Triggers a temperature conversion and reads the uncompensated value UT.
///
/// Each call consumes one conversion on the sensor.
pub fn read_raw_temperature<T, D>(transport: &mut T, delay: &mut D) -> Result<i16, T::Error>
where
    T: Transport,
    D: DelayUs<u32>,
{
    transport
        .write_byte(BMP180_CONTROL_REGISTER, BMP180_START_TEMPERATURE_CONVERSION)
        .map_err(Error::Transport)?;

    delay.delay_us(BMP180_TEMPERATURE_CONVERSION_TIME_US);

    let word = transport
        .read_word(BMP180_RESULT_REGISTER)
        .map_err(Error::Transport)?;

    let ut = word as i16;
    debug!("raw temperature: {}", ut);
    Ok(ut)
}

/// Triggers a pressure conversion and reads the uncompensated value UP.
///
/// The result has `16 + oss` significant bits. Each call consumes one
/// conversion on the sensor.
pub fn read_raw_pressure<T, D>(
    transport: &mut T,
    delay: &mut D,
    oversampling: Oversampling,
    timing: ConversionTiming,
) -> Result<i32, T::Error>
where
    T: Transport,
    D: DelayUs<u32>,
{
    transport
        .write_byte(BMP180_CONTROL_REGISTER, oversampling.pressure_command())
        .map_err(Error::Transport)?;

    delay.delay_us(timing.pressure_conversion_time_us(oversampling));

    let mut buf = [0_u8; 3];
    transport
        .read_block(BMP180_RESULT_REGISTER, &mut buf)
        .map_err(Error::Transport)?;

    let up = assemble_raw_pressure(buf, oversampling);
    debug!("raw pressure: {} (oss {})", up, oversampling.setting());
    Ok(up)
}

/// Combines MSB, LSB and XLSB of a pressure result and drops the padding bits.
fn assemble_raw_pressure(buf: [u8; 3], oversampling: Oversampling) -> i32 {
    let adc_value = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32;
    (adc_value >> oversampling.padding_bits()) as i32
}

/// Calculates the true temperature from the raw value UT.
///
/// X1 = (UT - AC6) * AC5 / 2^15
/// X2 = MC * 2^11 / (X1 + MD)
/// B5 = X1 + X2
/// T  = (B5 + 8) / 2^4
///
/// All shifts are arithmetic, i.e. they floor negative values, while the
/// division truncates toward zero.
pub fn compensate_temperature(
    ut: i16,
    coeffs: &CalibrationCoefficients,
) -> core::result::Result<Temperature, SensorFault> {
    let x1 = calculate_temperature_x1(ut, coeffs);

    let divisor = x1 + coeffs.md as i64;
    if divisor == 0 {
        warn!("x1 + md is zero for ut = {}", ut);
        return Err(SensorFault::TemperatureDivisorZero);
    }
    let x2 = ((coeffs.mc as i64) << 11) / divisor;

    let b5 = x1 + x2;
    let deci_celsius = (b5 + 8) >> 4;
    trace!("x1 = {}, x2 = {}, b5 = {}", x1, x2, b5);

    Ok(Temperature {
        deci_celsius: deci_celsius as i32,
        b5: B5(b5 as i32),
    })
}

/// X1 = (UT - AC6) * AC5 / 2^15
///
/// Note: The product does not fit in 32 bits for every 16-bit UT, so this is
/// evaluated in 64 bits. For any 16-bit UT, B5 and T stay within 32 bits.
fn calculate_temperature_x1(ut: i16, coeffs: &CalibrationCoefficients) -> i64 {
    ((ut as i64 - coeffs.ac6 as i64) * coeffs.ac5 as i64) >> 15
}

/// Calculates the true pressure in pascals from the raw value UP, using the
/// `B5` of the same measurement cycle.
pub fn compensate_pressure(
    up: i32,
    b5: B5,
    coeffs: &CalibrationCoefficients,
    oversampling: Oversampling,
) -> core::result::Result<i32, SensorFault> {
    let b6 = b5.value() as i64 - 4000;

    let b3 = calculate_b3(b6, coeffs, oversampling);
    let b4 = calculate_b4(b6, coeffs);
    let b7 = calculate_b7(up, b3, oversampling);
    trace!("b6 = {}, b3 = {}, b4 = {}, b7 = {}", b6, b3, b4, b7);

    let p = divide_b7(b7, b4).map_err(|fault| {
        warn!("b4 is zero for up = {}", up);
        fault
    })?;

    Ok(apply_final_correction(p as i32))
}

/// B3 = ((AC1 * 4 + X3) << oss + 2) / 4, where
/// X3 = B2 * (B6^2 / 2^12) / 2^11 + AC2 * B6 / 2^11
fn calculate_b3(b6: i64, coeffs: &CalibrationCoefficients, oversampling: Oversampling) -> i64 {
    let x1 = (coeffs.b2 as i64 * ((b6 * b6) >> 12)) >> 11;
    let x2 = (coeffs.ac2 as i64 * b6) >> 11;
    let x3 = x1 + x2;
    (((coeffs.ac1 as i64 * 4 + x3) << oversampling.setting()) + 2) >> 2
}

/// B4 = AC4 * (unsigned)(X3 + 32768) / 2^15, where
/// X3 = (AC3 * B6 / 2^13 + B1 * (B6^2 / 2^12) / 2^16 + 2) / 4
///
/// The multiplication is done in unsigned 32-bit arithmetic and wraps.
fn calculate_b4(b6: i64, coeffs: &CalibrationCoefficients) -> u32 {
    let x1 = (coeffs.ac3 as i64 * b6) >> 13;
    let x2 = (coeffs.b1 as i64 * ((b6 * b6) >> 12)) >> 16;
    let x3 = ((x1 + x2) + 2) >> 2;
    (coeffs.ac4 as u32).wrapping_mul((x3 + 32768) as u32) >> 15
}

/// B7 = ((unsigned)UP - B3) * (50000 >> oss), in wrapping unsigned 32-bit
/// arithmetic.
fn calculate_b7(up: i32, b3: i64, oversampling: Oversampling) -> u32 {
    (up as u32)
        .wrapping_sub(b3 as u32)
        .wrapping_mul(50000 >> oversampling.setting())
}

/// Calculates the uncorrected pressure from B7 and B4.
///
/// Below 0x80000000 the doubling happens before the division to keep
/// precision, above it happens after the division so it cannot overflow.
fn divide_b7(b7: u32, b4: u32) -> core::result::Result<u32, SensorFault> {
    if b4 == 0 {
        return Err(SensorFault::PressureDivisorZero);
    }

    if b7 < 0x8000_0000 {
        Ok((b7 * 2) / b4)
    } else {
        Ok((b7 / b4).wrapping_mul(2))
    }
}

/// p = p + (X1 + X2 + 3791) / 2^4, where
/// X1 = (p / 2^8)^2 * 3038 / 2^16
/// X2 = -7357 * p / 2^16
fn apply_final_correction(p: i32) -> i32 {
    let p = p as i64;
    let x1 = (p >> 8) * (p >> 8);
    let x1 = (x1 * 3038) >> 16;
    let x2 = (-7357 * p) >> 16;
    (p + ((x1 + x2 + 3791) >> 4)) as i32
}

/// Estimates the altitude in meters for a pressure in pascals, relative to
/// the standard sea level pressure of 101325 Pa.
///
/// altitude = 44330 * (1 - (p / p0)^(1 / 5.255))
///
/// Returns NaN for pressures at or below zero, callers should treat a
/// non-finite altitude as invalid. See [`checked_altitude`].
pub fn altitude(pressure: i32) -> f32 {
    altitude_with_reference(pressure, SEA_LEVEL_PRESSURE_PA)
}

/// Given a pressure (Pa) and the pressure at a baseline (Pa), returns the
/// altitude change (in meters) for the delta in pressures.
pub fn altitude_with_reference(pressure: i32, reference_pa: f32) -> f32 {
    if pressure <= 0 {
        return f32::NAN;
    }

    // The ratio is formed in single precision, the power in double precision.
    let ratio = pressure as f32 / reference_pa;
    (44330.0 * (1.0 - libm::pow(ratio as f64, 1.0 / 5.255))) as f32
}

/// Like [`altitude`], but reports a non-finite result as an error.
pub fn checked_altitude(pressure: i32) -> core::result::Result<f32, DomainError> {
    check_altitude(pressure, altitude(pressure))
}

fn check_altitude(pressure: i32, meters: f32) -> core::result::Result<f32, DomainError> {
    if meters.is_finite() {
        Ok(meters)
    } else {
        warn!("altitude is not finite for {} Pa", pressure);
        Err(DomainError { pressure })
    }
}

/// Given a pressure (Pa) taken at a specific altitude (meters), returns the
/// equivalent pressure (Pa) at sea level.
///
/// This produces pressure readings that can be used for weather
/// measurements.
pub fn sea_level_pressure(pressure: f32, altitude_m: f32) -> f32 {
    pressure / libm::powf(1.0 - (altitude_m / 44330.0), 5.255)
}

/// A BMP180 with its calibration block, ready to take measurements.
///
/// The session owns the bus and the delay provider, so a full
/// trigger-wait-read sequence can never be interleaved with another one.
/// Sharing the bus with other devices requires a bus manager that hands out
/// a [`Transport`] per device.
#[derive(Debug)]
pub struct Session<T, D> {
    /// Bus the sensor is attached to.
    transport: T,

    /// Used to wait for conversions to finish.
    delay: D,

    /// Calibration coefficients stored on the chip.
    coeffs: CalibrationCoefficients,

    /// Pressure oversampling used for every measurement.
    oversampling: Oversampling,

    /// Pressure conversion wait.
    timing: ConversionTiming,
}

impl<T, D> Session<T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    /// Creates a session with the default conversion timing.
    ///
    /// Reads the calibration coefficients; fails if any of them cannot be
    /// read.
    pub fn new(transport: T, delay: D, oversampling: Oversampling) -> Result<Self, T::Error> {
        Self::with_timing(transport, delay, oversampling, ConversionTiming::default())
    }

    /// Creates a session with an explicit pressure conversion timing.
    pub fn with_timing(
        mut transport: T,
        delay: D,
        oversampling: Oversampling,
        timing: ConversionTiming,
    ) -> Result<Self, T::Error> {
        let coeffs = CalibrationCoefficients::load(&mut transport)?;
        debug!(
            "session ready, oss {}, pressure wait {} us",
            oversampling.setting(),
            timing.pressure_conversion_time_us(oversampling)
        );

        Ok(Self {
            transport,
            delay,
            coeffs,
            oversampling,
            timing,
        })
    }

    /// Calibration coefficients read at session start.
    pub fn calibration(&self) -> &CalibrationCoefficients {
        &self.coeffs
    }

    /// Pressure oversampling used for every measurement.
    pub fn oversampling(&self) -> Oversampling {
        self.oversampling
    }

    /// Pressure conversion timing used for every measurement.
    pub fn timing(&self) -> ConversionTiming {
        self.timing
    }

    /// Reads the chip-id register.
    pub fn chip_id(&mut self) -> Result<u8, T::Error> {
        let mut buf = [0_u8; 1];
        self.transport
            .read_block(BMP180_CHIP_ID_REGISTER, &mut buf)
            .map_err(Error::Transport)?;
        Ok(buf[0])
    }

    /// Checks that the device is a BMP180.
    pub fn verify_chip_id(&mut self) -> Result<(), T::Error> {
        match self.chip_id()? {
            BMP180_CHIP_ID => Ok(()),
            other => Err(Error::UnexpectedChipId(other)),
        }
    }

    /// Triggers a temperature conversion and reads the raw value.
    pub fn read_raw_temperature(&mut self) -> Result<i16, T::Error> {
        read_raw_temperature(&mut self.transport, &mut self.delay)
    }

    /// Triggers a pressure conversion and reads the raw value.
    pub fn read_raw_pressure(&mut self) -> Result<i32, T::Error> {
        read_raw_pressure(
            &mut self.transport,
            &mut self.delay,
            self.oversampling,
            self.timing,
        )
    }

    /// Runs one measurement cycle: a temperature conversion, a pressure
    /// conversion, then compensation of both.
    pub fn measure(&mut self) -> Result<Reading, T::Error> {
        let ut = self.read_raw_temperature()?;
        let up = self.read_raw_pressure()?;

        let temperature = compensate_temperature(ut, &self.coeffs)?;
        let pressure = compensate_pressure(up, temperature.b5(), &self.coeffs, self.oversampling)?;

        Ok(Reading {
            temperature,
            pressure,
        })
    }

    /// Gives back the transport and the delay provider.
    pub fn release(self) -> (T, D) {
        (self.transport, self.delay)
    }
}
