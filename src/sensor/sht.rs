//! Sensirion SHT3x / SHTC3 humidity + temperature sensors.
//!
//! Both parts speak 16-bit commands and answer with big-endian words, each
//! followed by a CRC-8 (poly 0x31, init 0xFF).

use anyhow::{bail, Context, Result};
use std::thread::sleep;
use std::time::Duration;

use super::RawSample;
use crate::hal::HardwareProvider;

pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

/// split a `[msb, lsb, crc]` x N frame into checked words
fn words<const N: usize>(frame: &[u8]) -> Result<[u16; N]> {
    if frame.len() != N * 3 {
        bail!("expected {} bytes, got {}", N * 3, frame.len());
    }
    let mut out = [0u16; N];
    for (word, c) in out.iter_mut().zip(frame.chunks_exact(3)) {
        if crc8(&c[..2]) != c[2] {
            bail!("crc mismatch in {}", hex::encode(c));
        }
        *word = u16::from_be_bytes([c[0], c[1]]);
    }
    Ok(out)
}

fn to_sample(t_raw: u16, h_raw: u16) -> RawSample {
    let temperature = -45.0 + 175.0 * f32::from(t_raw) / 65535.0;
    let humidity = (100.0 * f32::from(h_raw) / 65535.0).clamp(0.0, 100.0);
    RawSample {
        temperature_c: Some(temperature),
        humidity_pct: Some(humidity),
        ..Default::default()
    }
}

fn command(hw: &dyn HardwareProvider, addr: u8, cmd: u16) -> Result<()> {
    hw.i2c_transfer(addr, &cmd.to_be_bytes(), 0)?;
    Ok(())
}

pub mod sht3x {
    use super::*;

    const READ_STATUS: u16 = 0xF32D;
    /// single shot, high repeatability, no clock stretching
    const MEASURE_HIGH: u16 = 0x2400;

    pub fn probe(hw: &dyn HardwareProvider, addr: u8) -> Result<()> {
        command(hw, addr, READ_STATUS)?;
        let frame = hw.i2c_transfer(addr, &[], 3)?;
        words::<1>(&frame).context("sht3x status")?;
        Ok(())
    }

    pub fn read(hw: &dyn HardwareProvider, addr: u8) -> Result<RawSample> {
        command(hw, addr, MEASURE_HIGH)?;
        sleep(Duration::from_millis(16));
        let frame = hw.i2c_transfer(addr, &[], 6)?;
        let [t_raw, h_raw] = words::<2>(&frame).context("sht3x measurement")?;
        Ok(to_sample(t_raw, h_raw))
    }
}

pub mod shtc3 {
    use super::*;

    const WAKE: u16 = 0x3517;
    const SLEEP: u16 = 0xB098;
    const READ_ID: u16 = 0xEFC8;
    /// normal mode, T first, no clock stretching
    const MEASURE: u16 = 0x7866;

    pub fn probe(hw: &dyn HardwareProvider, addr: u8) -> Result<()> {
        command(hw, addr, WAKE)?;
        sleep(Duration::from_micros(250));
        command(hw, addr, READ_ID)?;
        let [id] = words::<1>(&hw.i2c_transfer(addr, &[], 3)?).context("shtc3 id")?;
        // a failed sleep leaves the part awake; harmless
        let _ = command(hw, addr, SLEEP);
        if id & 0x083F != 0x0807 {
            bail!("unexpected shtc3 id 0x{:04X}", id);
        }
        Ok(())
    }

    pub fn read(hw: &dyn HardwareProvider, addr: u8) -> Result<RawSample> {
        command(hw, addr, WAKE)?;
        sleep(Duration::from_micros(250));
        command(hw, addr, MEASURE)?;
        sleep(Duration::from_millis(13));
        let frame = hw.i2c_transfer(addr, &[], 6);
        let _ = command(hw, addr, SLEEP);
        let [t_raw, h_raw] = words::<2>(&frame?).context("shtc3 measurement")?;
        Ok(to_sample(t_raw, h_raw))
    }
}
