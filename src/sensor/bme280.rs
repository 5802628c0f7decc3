//! Bosch BME280 / BMP280 (same register map; the BMP280 has no humidity).
//!
//! Uses forced mode so each read triggers exactly one conversion, and the
//! datasheet's fixed-point compensation.

use anyhow::{bail, Result};
use std::thread::sleep;
use std::time::Duration;

use super::RawSample;
use crate::hal::HardwareProvider;

const REG_CHIP_ID: u8 = 0xD0;
const REG_CALIB_00: u8 = 0x88;
const REG_CALIB_H1: u8 = 0xA1;
const REG_CALIB_26: u8 = 0xE1;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_PRESS_MSB: u8 = 0xF7;

pub const BME280_ID: u8 = 0x60;
/// production id plus the two engineering-sample ids
pub const BMP280_IDS: [u8; 3] = [0x58, 0x56, 0x57];

/// oversampling x1 for every channel, forced mode
const CTRL_MEAS_FORCED: u8 = 0b001_001_01;

#[derive(Clone, Copy, Debug, Default)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
    /// None on a BMP280
    pub humidity: Option<HumidityCalibration>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HumidityCalibration {
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

pub fn chip_id(hw: &dyn HardwareProvider, addr: u8) -> Result<u8> {
    let id = hw.i2c_transfer(addr, &[REG_CHIP_ID], 1)?;
    id.first().copied().ok_or_else(|| anyhow::anyhow!("empty chip id read"))
}

pub fn read_calibration(hw: &dyn HardwareProvider, addr: u8, with_humidity: bool) -> Result<Calibration> {
    let c = hw.i2c_transfer(addr, &[REG_CALIB_00], 24)?;
    if c.len() < 24 {
        bail!("short calibration block");
    }
    let u = |i: usize| u16::from_le_bytes([c[i], c[i + 1]]);
    let s = |i: usize| i16::from_le_bytes([c[i], c[i + 1]]);

    let humidity = if with_humidity {
        let h1 = hw.i2c_transfer(addr, &[REG_CALIB_H1], 1)?;
        let h = hw.i2c_transfer(addr, &[REG_CALIB_26], 7)?;
        if h1.is_empty() || h.len() < 7 {
            bail!("short humidity calibration block");
        }
        Some(HumidityCalibration {
            h1: h1[0],
            h2: i16::from_le_bytes([h[0], h[1]]),
            h3: h[2],
            // h4/h5 share a nibble in 0xE5
            h4: (i16::from(h[3] as i8) << 4) | i16::from(h[4] & 0x0F),
            h5: (i16::from(h[5] as i8) << 4) | i16::from(h[4] >> 4),
            h6: h[6] as i8,
        })
    } else {
        None
    };

    Ok(Calibration {
        t1: u(0),
        t2: s(2),
        t3: s(4),
        p1: u(6),
        p2: s(8),
        p3: s(10),
        p4: s(12),
        p5: s(14),
        p6: s(16),
        p7: s(18),
        p8: s(20),
        p9: s(22),
        humidity,
    })
}

pub fn configure(hw: &dyn HardwareProvider, addr: u8) -> Result<()> {
    // standby irrelevant in forced mode, iir filter off
    hw.i2c_transfer(addr, &[REG_CONFIG, 0x00], 0)?;
    Ok(())
}

pub fn read(hw: &dyn HardwareProvider, addr: u8, cal: &Calibration) -> Result<RawSample> {
    if cal.humidity.is_some() {
        // ctrl_hum only latches on the following ctrl_meas write
        hw.i2c_transfer(addr, &[REG_CTRL_HUM, 0x01], 0)?;
    }
    hw.i2c_transfer(addr, &[REG_CTRL_MEAS, CTRL_MEAS_FORCED], 0)?;
    sleep(Duration::from_millis(10));

    let len = if cal.humidity.is_some() { 8 } else { 6 };
    let raw = hw.i2c_transfer(addr, &[REG_PRESS_MSB], len)?;
    if raw.len() < len as usize {
        bail!("short data read");
    }

    let adc_p = (i32::from(raw[0]) << 12) | (i32::from(raw[1]) << 4) | (i32::from(raw[2]) >> 4);
    let adc_t = (i32::from(raw[3]) << 12) | (i32::from(raw[4]) << 4) | (i32::from(raw[5]) >> 4);

    let t_fine = t_fine(cal, adc_t);
    let mut sample = RawSample {
        temperature_c: Some(temperature(t_fine)),
        pressure_pa: pressure(cal, adc_p, t_fine),
        ..Default::default()
    };
    if let Some(h) = &cal.humidity {
        let adc_h = (i32::from(raw[6]) << 8) | i32::from(raw[7]);
        sample.humidity_pct = Some(humidity(h, adc_h, t_fine));
    }
    Ok(sample)
}

pub fn t_fine(cal: &Calibration, adc_t: i32) -> i32 {
    let t1 = i32::from(cal.t1);
    let var1 = (((adc_t >> 3) - (t1 << 1)) * i32::from(cal.t2)) >> 11;
    let var2 = (((((adc_t >> 4) - t1) * ((adc_t >> 4) - t1)) >> 12) * i32::from(cal.t3)) >> 14;
    var1 + var2
}

pub fn temperature(t_fine: i32) -> f32 {
    ((t_fine * 5 + 128) >> 8) as f32 / 100.0
}

/// pascals, or None when the calibration would divide by zero
pub fn pressure(cal: &Calibration, adc_p: i32, t_fine: i32) -> Option<f32> {
    let mut var1 = i64::from(t_fine) - 128_000;
    let mut var2 = var1 * var1 * i64::from(cal.p6);
    var2 += (var1 * i64::from(cal.p5)) << 17;
    var2 += i64::from(cal.p4) << 35;
    var1 = ((var1 * var1 * i64::from(cal.p3)) >> 8) + ((var1 * i64::from(cal.p2)) << 12);
    var1 = (((1i64 << 47) + var1) * i64::from(cal.p1)) >> 33;
    if var1 == 0 {
        return None;
    }
    let mut p: i64 = 1_048_576 - i64::from(adc_p);
    p = (((p << 31) - var2) * 3125) / var1;
    var1 = (i64::from(cal.p9) * (p >> 13) * (p >> 13)) >> 25;
    var2 = (i64::from(cal.p8) * p) >> 19;
    p = ((p + var1 + var2) >> 8) + (i64::from(cal.p7) << 4);
    // Q24.8
    Some(p as f32 / 256.0)
}

pub fn humidity(h: &HumidityCalibration, adc_h: i32, t_fine: i32) -> f32 {
    let adc_h = i64::from(adc_h);
    let mut v = i64::from(t_fine) - 76_800;
    v = (((adc_h << 14) - (i64::from(h.h4) << 20) - (i64::from(h.h5) * v) + 16_384) >> 15)
        * (((((((v * i64::from(h.h6)) >> 10) * (((v * i64::from(h.h3)) >> 11) + 32_768)) >> 10)
            + 2_097_152)
            * i64::from(h.h2)
            + 8_192)
            >> 14);
    v -= ((((v >> 15) * (v >> 15)) >> 7) * i64::from(h.h1)) >> 4;
    v = v.clamp(0, 419_430_400);
    // Q22.10
    (v >> 12) as f32 / 1024.0
}
