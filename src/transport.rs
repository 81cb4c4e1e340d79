//! Register-level access to the sensor.
//!
//! The driver only needs three primitives from the bus. [`I2cTransport`]
//! provides them on top of any [`embedded-hal`] blocking I2C implementation;
//! other buses (or test doubles) can implement [`Transport`] directly.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal

use embedded_hal::blocking::i2c::{Write, WriteRead};

/// 7-bit unshifted I2C address for the BMP180 sensor.
pub const BMP180_ADDR: u8 = 0x77;

/// Register-oriented access to a BMP180.
pub trait Transport {
    /// Error reported by the bus.
    type Error: core::fmt::Debug;

    /// Reads the 16-bit word starting at `register`, resolved to host byte
    /// order.
    fn read_word(&mut self, register: u8) -> Result<u16, Self::Error>;

    /// Writes a single byte to `register`.
    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), Self::Error>;

    /// Fills `buf` with consecutive bytes starting at `register`.
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), Self::Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn read_word(&mut self, register: u8) -> Result<u16, Self::Error> {
        (**self).read_word(register)
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), Self::Error> {
        (**self).write_byte(register, value)
    }

    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read_block(register, buf)
    }
}

/// [`Transport`] over an I2C bus.
#[derive(Debug)]
pub struct I2cTransport<I2C> {
    /// I2C interface for communicating with the sensor.
    i2c: I2C,

    /// Device address on the bus.
    address: u8,
}

impl<I2C> I2cTransport<I2C> {
    /// Talks to the sensor at its fixed address [`BMP180_ADDR`].
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, BMP180_ADDR)
    }

    /// Talks to a sensor at a non-standard address, e.g. behind an address
    /// translator.
    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Device address used for every transfer.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Gives back the I2C interface.
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C, E> Transport for I2cTransport<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>,
    E: core::fmt::Debug,
{
    type Error = E;

    fn read_word(&mut self, register: u8) -> Result<u16, E> {
        let mut buf = [0_u8; 2];
        self.i2c.write_read(self.address, &[register], &mut buf)?;
        // MSB first on the wire.
        Ok(u16::from_be_bytes(buf))
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), E> {
        self.i2c.write(self.address, &[register, value])
    }

    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), E> {
        self.i2c.write_read(self.address, &[register], buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    use embedded_hal_mock::MockError;
    use std::io::ErrorKind;

    #[test]
    fn read_word_is_big_endian() {
        let i2c = I2cMock::new(&[I2cTransaction::write_read(
            BMP180_ADDR,
            vec![0xAA],
            vec![0x01, 0x98],
        )]);
        let mut transport = I2cTransport::new(i2c);

        assert_eq!(transport.read_word(0xAA).unwrap(), 408);

        transport.release().done();
    }

    #[test]
    fn write_byte_sends_register_then_value() {
        let i2c = I2cMock::new(&[I2cTransaction::write(BMP180_ADDR, vec![0xF4, 0x2E])]);
        let mut transport = I2cTransport::new(i2c);

        transport.write_byte(0xF4, 0x2E).unwrap();

        transport.release().done();
    }

    #[test]
    fn read_block_fills_buffer() {
        let i2c = I2cMock::new(&[I2cTransaction::write_read(
            BMP180_ADDR,
            vec![0xF6],
            vec![0x5D, 0x23, 0x00],
        )]);
        let mut transport = I2cTransport::new(i2c);

        let mut buf = [0_u8; 3];
        transport.read_block(0xF6, &mut buf).unwrap();
        assert_eq!(buf, [0x5D, 0x23, 0x00]);

        transport.release().done();
    }

    #[test]
    fn custom_address_is_used() {
        let i2c = I2cMock::new(&[I2cTransaction::write(0x70, vec![0xF4, 0x34])]);
        let mut transport = I2cTransport::with_address(i2c, 0x70);
        assert_eq!(transport.address(), 0x70);

        transport.write_byte(0xF4, 0x34).unwrap();

        transport.release().done();
    }

    #[test]
    fn bus_errors_pass_through() {
        let i2c = I2cMock::new(&[I2cTransaction::write_read(
            BMP180_ADDR,
            vec![0xF6],
            vec![0x00, 0x00],
        )
        .with_error(MockError::Io(ErrorKind::Other))]);
        let mut transport = I2cTransport::new(i2c);

        let result = transport.read_word(0xF6);
        assert!(matches!(result, Err(MockError::Io(ErrorKind::Other))));

        transport.release().done();
    }
}
