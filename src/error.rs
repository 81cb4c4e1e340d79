//! Error taxonomy of the driver.

use thiserror_no_std::Error as ThisError;

/// Shorthand for all functions returning an error in this crate, generic over
/// the error type of the underlying transport.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// A precondition of the compensation algorithm was violated at runtime.
///
/// The datasheet arithmetic divides by values derived from the calibration
/// coefficients and the raw readings. For data read correctly from a working
/// sensor these are never zero, so a zero divisor means the cycle's raw data
/// or the calibration block is corrupt.
#[derive(ThisError, Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorFault {
    /// `x1 + md` evaluated to zero during temperature compensation.
    #[error("temperature compensation divisor (x1 + md) is zero")]
    TemperatureDivisorZero,

    /// `b4` evaluated to zero during pressure compensation.
    #[error("pressure compensation divisor (b4) is zero")]
    PressureDivisorZero,
}

/// The altitude computed from a pressure is not a finite number.
///
/// The barometric formula is undefined for pressures at or below zero, and for
/// a non-positive reference pressure.
#[derive(ThisError, Copy, Clone, Debug, Eq, PartialEq)]
#[error("altitude is undefined for a pressure of {pressure} Pa")]
pub struct DomainError {
    /// Pressure in pascals that produced the invalid altitude.
    pub pressure: i32,
}

/// Represents any error that may happen while talking to the sensor or while
/// turning its readings into physical units.
#[derive(ThisError, Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error<E: core::fmt::Debug> {
    /// A read or write on the bus failed. The current measurement cycle is
    /// aborted; during session setup the session is not created.
    #[error("bus transfer failed")]
    Transport(E),

    /// The compensation algorithm hit a zero divisor.
    #[error("sensor fault: {0}")]
    SensorFault(#[from] SensorFault),

    /// An altitude could not be derived from a reading.
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// A calibration word read back as `0x0000` or `0xFFFF`, which the sensor
    /// never stores.
    #[error("calibration register {register:#04x} holds an invalid value")]
    InvalidCalibration {
        /// EEPROM register address of the rejected word.
        register: u8,
    },

    /// The chip-id register did not identify a BMP180.
    #[error("unexpected chip id {0:#04x}")]
    UnexpectedChipId(u8),
}

impl<E: core::fmt::Debug> Error<E> {
    /// Returns `true` if the error originated on the bus rather than in the
    /// sensor data.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
