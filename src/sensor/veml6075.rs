//! Vishay VEML6075 UVA/UVB sensor.

use anyhow::{bail, Result};

use super::RawSample;
use crate::hal::HardwareProvider;

pub const DEVICE_ID: u8 = 0x26;

const REG_UV_CONF: u8 = 0x00;
const REG_UVA: u8 = 0x07;
const REG_UVB: u8 = 0x09;
const REG_UVCOMP1: u8 = 0x0A;
const REG_UVCOMP2: u8 = 0x0B;
const REG_ID: u8 = 0x0C;

/// 100 ms integration, powered on
const CONF_IT_100MS: u8 = 0x10;

// visible / ir compensation, from the vendor application note
const UVA_VIS_COEF: f32 = 2.22;
const UVA_IR_COEF: f32 = 1.33;
const UVB_VIS_COEF: f32 = 2.95;
const UVB_IR_COEF: f32 = 1.74;
const UVA_RESPONSIVITY: f32 = 0.001461;
const UVB_RESPONSIVITY: f32 = 0.002591;

fn read_reg(hw: &dyn HardwareProvider, addr: u8, reg: u8) -> Result<u16> {
    let b = hw.i2c_transfer(addr, &[reg], 2)?;
    if b.len() < 2 {
        bail!("short read of register 0x{:02X}", reg);
    }
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub fn init(hw: &dyn HardwareProvider, addr: u8) -> Result<()> {
    let id = read_reg(hw, addr, REG_ID)?;
    if id & 0xFF != u16::from(DEVICE_ID) {
        bail!("unexpected veml6075 id 0x{:04X}", id);
    }
    hw.i2c_transfer(addr, &[REG_UV_CONF, CONF_IT_100MS, 0x00], 0)?;
    Ok(())
}

pub fn read(hw: &dyn HardwareProvider, addr: u8) -> Result<RawSample> {
    let uva = f32::from(read_reg(hw, addr, REG_UVA)?);
    let uvb = f32::from(read_reg(hw, addr, REG_UVB)?);
    let comp1 = f32::from(read_reg(hw, addr, REG_UVCOMP1)?);
    let comp2 = f32::from(read_reg(hw, addr, REG_UVCOMP2)?);
    Ok(compensate(uva, uvb, comp1, comp2))
}

pub fn compensate(uva: f32, uvb: f32, comp1: f32, comp2: f32) -> RawSample {
    let uva = (uva - UVA_VIS_COEF * comp1 - UVA_IR_COEF * comp2).max(0.0);
    let uvb = (uvb - UVB_VIS_COEF * comp1 - UVB_IR_COEF * comp2).max(0.0);
    let uv_index = (uva * UVA_RESPONSIVITY + uvb * UVB_RESPONSIVITY) / 2.0;
    RawSample {
        uva: Some(uva),
        uvb: Some(uvb),
        uv_index: Some(uv_index),
        ..Default::default()
    }
}
