//! Bosch BME680 four-in-one (temperature, humidity, pressure, gas).
//!
//! Forced mode with the gas heater at 320 °C for 150 ms; compensation uses
//! the floating-point formulas from the Bosch reference driver.

use anyhow::{anyhow, bail, Result};
use std::thread::sleep;
use std::time::Duration;

use super::RawSample;
use crate::hal::HardwareProvider;

pub const CHIP_ID: u8 = 0x61;

const REG_CHIP_ID: u8 = 0xD0;
const REG_SOFT_RESET: u8 = 0xE0;
const REG_COEFF1: u8 = 0x8A;
const REG_COEFF2: u8 = 0xE1;
const REG_COEFF3: u8 = 0x00;
const REG_FIELD0: u8 = 0x1D;
const REG_RES_HEAT0: u8 = 0x5A;
const REG_GAS_WAIT0: u8 = 0x64;
const REG_CTRL_GAS1: u8 = 0x71;
const REG_CTRL_HUM: u8 = 0x72;
const REG_CTRL_MEAS: u8 = 0x74;
const REG_CONFIG: u8 = 0x75;

const HEATER_TARGET_C: f32 = 320.0;
const HEATER_MS: u16 = 150;

/// temperature x2, pressure x16, forced mode
const CTRL_MEAS_FORCED: u8 = (0b010 << 5) | (0b101 << 2) | 0b01;

const GAS_RANGE_K1: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -0.8, 0.0, 0.0, -0.2, -0.5, 0.0, -1.0, 0.0, 0.0,
];
const GAS_RANGE_K2: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.1, 0.7, 0.0, -0.8, -0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

#[derive(Clone, Copy, Debug, Default)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i8,
    pub p1: u16,
    pub p2: i16,
    pub p3: i8,
    pub p4: i16,
    pub p5: i16,
    pub p6: i8,
    pub p7: i8,
    pub p8: i16,
    pub p9: i16,
    pub p10: u8,
    pub h1: u16,
    pub h2: u16,
    pub h3: i8,
    pub h4: i8,
    pub h5: i8,
    pub h6: u8,
    pub h7: i8,
    pub gh1: i8,
    pub gh2: i16,
    pub gh3: i8,
    pub res_heat_range: u8,
    pub res_heat_val: i8,
    pub range_sw_err: i8,
}

impl Calibration {
    /// decode the three coefficient blocks laid end to end (23 + 14 + 5 bytes)
    pub fn from_coefficients(c: &[u8]) -> Result<Self> {
        if c.len() < 42 {
            bail!("short coefficient block ({} bytes)", c.len());
        }
        let le_u = |lsb: usize, msb: usize| u16::from_le_bytes([c[lsb], c[msb]]);
        let le_s = |lsb: usize, msb: usize| i16::from_le_bytes([c[lsb], c[msb]]);

        Ok(Self {
            t1: le_u(31, 32),
            t2: le_s(0, 1),
            t3: c[2] as i8,
            p1: le_u(4, 5),
            p2: le_s(6, 7),
            p3: c[8] as i8,
            p4: le_s(10, 11),
            p5: le_s(12, 13),
            p7: c[14] as i8,
            p6: c[15] as i8,
            p8: le_s(18, 19),
            p9: le_s(20, 21),
            p10: c[22],
            h2: (u16::from(c[23]) << 4) | u16::from(c[24] >> 4),
            h1: (u16::from(c[25]) << 4) | u16::from(c[24] & 0x0F),
            h3: c[26] as i8,
            h4: c[27] as i8,
            h5: c[28] as i8,
            h6: c[29],
            h7: c[30] as i8,
            gh2: le_s(33, 34),
            gh1: c[35] as i8,
            gh3: c[36] as i8,
            res_heat_val: c[37] as i8,
            res_heat_range: (c[39] & 0x30) >> 4,
            range_sw_err: ((c[41] & 0xF0) as i8) >> 4,
        })
    }
}

pub fn chip_id(hw: &dyn HardwareProvider, addr: u8) -> Result<u8> {
    let id = hw.i2c_transfer(addr, &[REG_CHIP_ID], 1)?;
    id.first().copied().ok_or_else(|| anyhow!("empty chip id read"))
}

pub fn init(hw: &dyn HardwareProvider, addr: u8) -> Result<Calibration> {
    hw.i2c_transfer(addr, &[REG_SOFT_RESET, 0xB6], 0)?;
    sleep(Duration::from_millis(10));

    let mut coeff = hw.i2c_transfer(addr, &[REG_COEFF1], 23)?;
    coeff.extend(hw.i2c_transfer(addr, &[REG_COEFF2], 14)?);
    coeff.extend(hw.i2c_transfer(addr, &[REG_COEFF3], 5)?);
    let cal = Calibration::from_coefficients(&coeff)?;

    hw.i2c_transfer(addr, &[REG_CTRL_HUM, 0x01], 0)?;
    // iir filter coefficient 3
    hw.i2c_transfer(addr, &[REG_CONFIG, 0b010 << 2], 0)?;
    hw.i2c_transfer(addr, &[REG_GAS_WAIT0, gas_wait(HEATER_MS)], 0)?;
    // run_gas, heater profile 0
    hw.i2c_transfer(addr, &[REG_CTRL_GAS1, 0x10], 0)?;
    Ok(cal)
}

/// one forced conversion; `ambient_c` tunes the heater target
pub fn read(hw: &dyn HardwareProvider, addr: u8, cal: &Calibration, ambient_c: f32) -> Result<RawSample> {
    let heat = heater_resistance(cal, HEATER_TARGET_C, ambient_c);
    hw.i2c_transfer(addr, &[REG_RES_HEAT0, heat], 0)?;
    hw.i2c_transfer(addr, &[REG_CTRL_MEAS, CTRL_MEAS_FORCED], 0)?;
    sleep(Duration::from_millis(u64::from(HEATER_MS) + 50));

    let f = hw.i2c_transfer(addr, &[REG_FIELD0], 15)?;
    if f.len() < 15 {
        bail!("short field read");
    }
    if f[0] & 0x80 == 0 {
        bail!("no new data");
    }

    let adc_p = (u32::from(f[2]) << 12) | (u32::from(f[3]) << 4) | (u32::from(f[4]) >> 4);
    let adc_t = (u32::from(f[5]) << 12) | (u32::from(f[6]) << 4) | (u32::from(f[7]) >> 4);
    let adc_h = (u32::from(f[8]) << 8) | u32::from(f[9]);
    let adc_g = (u32::from(f[13]) << 2) | (u32::from(f[14]) >> 6);
    let gas_range = f[14] & 0x0F;
    let gas_ok = f[14] & 0x20 != 0 && f[14] & 0x10 != 0;

    let t_fine = t_fine(cal, adc_t as f32);
    Ok(RawSample {
        temperature_c: Some(t_fine / 5120.0),
        humidity_pct: Some(humidity(cal, adc_h as f32, t_fine)),
        pressure_pa: pressure(cal, adc_p as f32, t_fine),
        gas_ohms: gas_ok.then(|| gas_resistance(cal, adc_g as f32, gas_range)),
        ..Default::default()
    })
}

/// encode a heater duration into the gas_wait register (64 steps x multiplier)
pub fn gas_wait(ms: u16) -> u8 {
    if ms >= 0x0FC0 {
        return 0xFF;
    }
    let mut dur = ms;
    let mut factor = 0u8;
    while dur > 0x3F {
        dur /= 4;
        factor += 1;
    }
    dur as u8 + factor * 64
}

pub fn heater_resistance(cal: &Calibration, target_c: f32, ambient_c: f32) -> u8 {
    let target = target_c.min(400.0);
    let var1 = f32::from(cal.gh1) / 16.0 + 49.0;
    let var2 = (f32::from(cal.gh2) / 32768.0) * 0.0005 + 0.00235;
    let var3 = f32::from(cal.gh3) / 1024.0;
    let var4 = var1 * (1.0 + var2 * target);
    let var5 = var4 + var3 * ambient_c;
    let res = 3.4
        * (var5
            * (4.0 / (4.0 + f32::from(cal.res_heat_range)))
            * (1.0 / (1.0 + f32::from(cal.res_heat_val) * 0.002))
            - 25.0);
    res.clamp(0.0, 255.0) as u8
}

pub fn t_fine(cal: &Calibration, adc_t: f32) -> f32 {
    let t1 = f32::from(cal.t1);
    let var1 = (adc_t / 16384.0 - t1 / 1024.0) * f32::from(cal.t2);
    let d = adc_t / 131072.0 - t1 / 8192.0;
    let var2 = d * d * (f32::from(cal.t3) * 16.0);
    var1 + var2
}

pub fn pressure(cal: &Calibration, adc_p: f32, t_fine: f32) -> Option<f32> {
    let mut var1 = t_fine / 2.0 - 64000.0;
    let mut var2 = var1 * var1 * (f32::from(cal.p6) / 131072.0);
    var2 += var1 * f32::from(cal.p5) * 2.0;
    var2 = var2 / 4.0 + f32::from(cal.p4) * 65536.0;
    var1 = ((f32::from(cal.p3) * var1 * var1) / 16384.0 + f32::from(cal.p2) * var1) / 524288.0;
    var1 = (1.0 + var1 / 32768.0) * f32::from(cal.p1);
    if var1 == 0.0 {
        return None;
    }
    let mut p = 1048576.0 - adc_p;
    p = ((p - var2 / 4096.0) * 6250.0) / var1;
    let var1 = (f32::from(cal.p9) * p * p) / 2147483648.0;
    let var2 = p * (f32::from(cal.p8) / 32768.0);
    let var3 = (p / 256.0).powi(3) * (f32::from(cal.p10) / 131072.0);
    Some(p + (var1 + var2 + var3 + f32::from(cal.p7) * 128.0) / 16.0)
}

pub fn humidity(cal: &Calibration, adc_h: f32, t_fine: f32) -> f32 {
    let temp = t_fine / 5120.0;
    let var1 = adc_h - (f32::from(cal.h1) * 16.0 + (f32::from(cal.h3) / 2.0) * temp);
    let var2 = var1
        * ((f32::from(cal.h2) / 262144.0)
            * (1.0
                + (f32::from(cal.h4) / 16384.0) * temp
                + (f32::from(cal.h5) / 1048576.0) * temp * temp));
    let var3 = f32::from(cal.h6) / 16384.0;
    let var4 = f32::from(cal.h7) / 2097152.0;
    (var2 + (var3 + var4 * temp) * var2 * var2).clamp(0.0, 100.0)
}

pub fn gas_resistance(cal: &Calibration, adc_g: f32, gas_range: u8) -> f32 {
    let range = usize::from(gas_range & 0x0F);
    let var1 = 1340.0 + 5.0 * f32::from(cal.range_sw_err);
    let var2 = var1 * (1.0 + GAS_RANGE_K1[range] / 100.0);
    let var3 = 1.0 + GAS_RANGE_K2[range] / 100.0;
    1.0 / (var3 * 0.000000125 * (1u32 << range) as f32 * ((adc_g - 512.0) / var2 + 1.0))
}
