//! Periodically reads a BMP180 on a Linux I2C bus and prints temperature,
//! pressure and altitude.
//!
//! Log output is controlled with `RUST_LOG`, e.g. `RUST_LOG=bmp180_baro=trace`
//! shows the compensation intermediates of every cycle.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use bmp180_baro::{ConversionTiming, Error, I2cTransport, Oversampling, Reading, Session};
use clap::Parser;
use linux_embedded_hal::{Delay, I2cdev};
use log::{error, info};

#[derive(Debug, Parser)]
#[command(version, about = "Reads a BMP180 barometric pressure sensor")]
struct Args {
    /// I2C bus device.
    #[arg(long, default_value = "/dev/i2c-1")]
    device: String,

    /// 7-bit device address, decimal or 0x-prefixed hex.
    #[arg(long, default_value = "0x77", value_parser = parse_address)]
    address: u8,

    /// Pressure oversampling setting.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(0..=3))]
    oversampling: u8,

    /// Seconds between measurements.
    #[arg(long, default_value_t = 2)]
    interval: u64,

    /// Number of measurements to take. Runs until interrupted if omitted.
    #[arg(long)]
    count: Option<u64>,

    /// Sea level reference pressure in Pa for the altitude estimate.
    #[arg(long, default_value_t = bmp180_baro::SEA_LEVEL_PRESSURE_PA)]
    sea_level: f32,

    /// Wait the datasheet maximum for pressure conversions.
    #[arg(long)]
    datasheet_timing: bool,
}

fn parse_address(s: &str) -> Result<u8, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// Formats a driver error including the bus error, which the driver's own
/// message leaves out.
fn describe<E: std::fmt::Debug>(err: &Error<E>) -> String {
    match err {
        Error::Transport(e) => format!("bus transfer failed: {e:?}"),
        other => other.to_string(),
    }
}

fn report(reading: &Reading, sea_level: f32) {
    println!();
    println!("Temperature: {:.2} C", reading.celsius());
    println!(
        "Pressure: {} Pa ({:.2} hPa)",
        reading.pressure,
        reading.pressure_hpa()
    );
    match reading.altitude_relative_to(sea_level) {
        Ok(meters) => println!("Altitude: {meters:.2} m"),
        Err(e) => println!("Altitude: invalid ({e})"),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let oversampling = Oversampling::from_setting(args.oversampling)
        .context("oversampling setting out of range")?;
    let timing = if args.datasheet_timing {
        ConversionTiming::DATASHEET
    } else {
        ConversionTiming::COMPAT
    };

    let i2c = I2cdev::new(&args.device)
        .with_context(|| format!("failed to open I2C bus {}", args.device))?;
    let transport = I2cTransport::with_address(i2c, args.address);

    let mut bmp180 = Session::with_timing(transport, Delay, oversampling, timing)
        .map_err(|e| anyhow!("failed to read calibration: {}", describe(&e)))?;

    if let Err(e) = bmp180.verify_chip_id() {
        bail!("no BMP180 at {:#04x}: {}", args.address, describe(&e));
    }

    info!(
        "BMP180 on {} at {:#04x}, oversampling {}, pressure wait {} us",
        args.device,
        args.address,
        oversampling.setting(),
        timing.pressure_conversion_time_us(oversampling)
    );
    println!("BMP180 Sensor Reading");

    let mut taken = 0_u64;
    loop {
        // A failed cycle is reported and skipped, the calibration stays valid.
        match bmp180.measure() {
            Ok(reading) => report(&reading, args.sea_level),
            Err(e) => error!("measurement failed: {}", describe(&e)),
        }

        taken += 1;
        if args.count.is_some_and(|count| taken >= count) {
            break;
        }
        thread::sleep(Duration::from_secs(args.interval));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn address_accepts_hex_and_decimal() {
        assert_eq!(parse_address("0x77"), Ok(0x77));
        assert_eq!(parse_address("0X76"), Ok(0x76));
        assert_eq!(parse_address("119"), Ok(119));
        assert!(parse_address("0x1FF").is_err());
    }

    #[test]
    fn defaults_match_the_sensor() {
        let args = Args::parse_from(["bmp180-reader"]);
        assert_eq!(args.device, "/dev/i2c-1");
        assert_eq!(args.address, 0x77);
        assert_eq!(args.oversampling, 3);
        assert_eq!(args.interval, 2);
        assert_eq!(args.count, None);
        assert!(!args.datasheet_timing);
    }

    #[test]
    fn oversampling_out_of_range_is_rejected() {
        assert!(Args::try_parse_from(["bmp180-reader", "--oversampling", "4"]).is_err());
    }
}
