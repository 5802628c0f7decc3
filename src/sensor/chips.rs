//! `ChipDriver` over the hal's i2c bus.
//!
//! Probing a chip also initializes it; calibration read during the probe is
//! kept per address for later reads.

use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{bme280, bme680, sht, veml6075, Chip, ChipDriver, RawSample};
use crate::hal::HardwareProvider;

/// heater compensation needs an ambient guess before the first reading
const DEFAULT_AMBIENT_C: f32 = 25.0;

pub struct I2cChips {
    hw: Arc<dyn HardwareProvider>,
    bmx280: HashMap<u8, bme280::Calibration>,
    bme680: HashMap<u8, bme680::Calibration>,
    last_ambient_c: f32,
}

impl I2cChips {
    pub fn new(hw: Arc<dyn HardwareProvider>) -> Self {
        Self {
            hw,
            bmx280: HashMap::new(),
            bme680: HashMap::new(),
            last_ambient_c: DEFAULT_AMBIENT_C,
        }
    }

    fn try_probe(&mut self, chip: Chip, addr: u8) -> Result<()> {
        let hw = self.hw.as_ref();
        match chip {
            Chip::Bme680 => {
                let id = bme680::chip_id(hw, addr)?;
                if id != bme680::CHIP_ID {
                    bail!("chip id 0x{:02X}", id);
                }
                let cal = bme680::init(hw, addr)?;
                self.bme680.insert(addr, cal);
            }
            Chip::Bme280 | Chip::Bmp280 => {
                let id = bme280::chip_id(hw, addr)?;
                let matches = match chip {
                    Chip::Bme280 => id == bme280::BME280_ID,
                    _ => bme280::BMP280_IDS.contains(&id),
                };
                if !matches {
                    bail!("chip id 0x{:02X}", id);
                }
                let cal = bme280::read_calibration(hw, addr, chip == Chip::Bme280)?;
                bme280::configure(hw, addr)?;
                self.bmx280.insert(addr, cal);
            }
            Chip::Sht3x => sht::sht3x::probe(hw, addr)?,
            Chip::Shtc3 => sht::shtc3::probe(hw, addr)?,
            Chip::Veml6075 => veml6075::init(hw, addr)?,
        }
        Ok(())
    }
}

impl ChipDriver for I2cChips {
    fn probe(&mut self, chip: Chip, addr: u8) -> bool {
        match self.try_probe(chip, addr) {
            Ok(()) => true,
            Err(e) => {
                debug!("[I2C] {} @0x{:02X} not present: {:#}", chip.name(), addr, e);
                false
            }
        }
    }

    fn read(&mut self, chip: Chip, addr: u8) -> Result<RawSample> {
        let hw = self.hw.as_ref();
        let uncalibrated = || anyhow!("{} @0x{:02X} was never probed", chip.name(), addr);
        match chip {
            Chip::Bme680 => {
                let cal = self.bme680.get(&addr).ok_or_else(uncalibrated)?;
                let sample = bme680::read(hw, addr, cal, self.last_ambient_c)?;
                if let Some(t) = sample.temperature_c.filter(|t| t.is_finite()) {
                    self.last_ambient_c = t;
                }
                Ok(sample)
            }
            Chip::Bme280 | Chip::Bmp280 => {
                let cal = self.bmx280.get(&addr).ok_or_else(uncalibrated)?;
                bme280::read(hw, addr, cal)
            }
            Chip::Sht3x => sht::sht3x::read(hw, addr),
            Chip::Shtc3 => sht::shtc3::read(hw, addr),
            Chip::Veml6075 => veml6075::read(hw, addr),
        }
    }
}
