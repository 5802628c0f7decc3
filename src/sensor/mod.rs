//! ==============================================================================
//! sensor - chip detection and normalized readings
//! ==============================================================================
//!
//! purpose:
//!     finds which air / light chip is on the bus (once, at boot) and turns
//!     whatever it reports into the station's reading types.
//!
//! probe order (first responder wins per domain):
//!     air:   BME680 @0x76, BME680 @0x77, SHT3x @0x44, SHTC3 @0x70,
//!            BME280 @0x76, BMP280 @0x76
//!     light: VEML6075 @0x10
//!
//! relationships:
//!     - chip protocols: bme280.rs, bme680.rs, sht.rs, veml6075.rs
//!     - bus adapter: chips.rs (ChipDriver over hal.rs)
//!     - used by: controller.rs (sample), device.rs (detect at boot)
//!
//! ==============================================================================

pub mod bme280;
pub mod bme680;
pub mod chips;
pub mod sht;
pub mod veml6075;

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::domain::{measured, AirReading, LightReading, AIR_SENTINEL, AUX_SENTINEL};

/// the chip families the station knows how to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Chip {
    Bme680,
    Sht3x,
    Shtc3,
    Bme280,
    Bmp280,
    Veml6075,
}

impl Chip {
    pub fn name(&self) -> &'static str {
        match self {
            Chip::Bme680 => "BME680",
            Chip::Sht3x => "SHT3x",
            Chip::Shtc3 => "SHTC3",
            Chip::Bme280 => "BME280",
            Chip::Bmp280 => "BMP280",
            Chip::Veml6075 => "VEML6075",
        }
    }
}

pub const AIR_PROBES: [(Chip, u8); 6] = [
    (Chip::Bme680, 0x76),
    (Chip::Bme680, 0x77),
    (Chip::Sht3x, 0x44),
    (Chip::Shtc3, 0x70),
    (Chip::Bme280, 0x76),
    (Chip::Bmp280, 0x76),
];

pub const LIGHT_PROBES: [(Chip, u8); 1] = [(Chip::Veml6075, 0x10)];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum AirSensor {
    #[default]
    None,
    Bme680,
    Bmp280,
    Bme280,
    Sht3x,
    Shtc3,
}

impl AirSensor {
    fn of(chip: Chip) -> Self {
        match chip {
            Chip::Bme680 => AirSensor::Bme680,
            Chip::Sht3x => AirSensor::Sht3x,
            Chip::Shtc3 => AirSensor::Shtc3,
            Chip::Bme280 => AirSensor::Bme280,
            Chip::Bmp280 => AirSensor::Bmp280,
            Chip::Veml6075 => AirSensor::None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum LightSensor {
    #[default]
    None,
    Veml6075,
}

impl fmt::Display for AirSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for LightSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SensorCapability {
    pub air: AirSensor,
    pub light: LightSensor,
}

/// whatever a chip produced on one read, in SI-ish units
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawSample {
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
    pub pressure_pa: Option<f32>,
    pub gas_ohms: Option<f32>,
    pub uva: Option<f32>,
    pub uvb: Option<f32>,
    pub uv_index: Option<f32>,
}

/// bus-level access to the chips in the probe tables
pub trait ChipDriver: Send {
    /// true if `chip` answers at `addr` and is ready to read
    fn probe(&mut self, chip: Chip, addr: u8) -> bool;
    fn read(&mut self, chip: Chip, addr: u8) -> Result<RawSample>;
}

/// the bound chips, fixed after `detect`
pub struct SensorBackend {
    driver: Box<dyn ChipDriver>,
    air: Option<(Chip, u8)>,
    light: Option<(Chip, u8)>,
}

impl SensorBackend {
    /// nothing bound yet; both domains read as invalid until `redetect`
    pub fn unbound(driver: Box<dyn ChipDriver>) -> Self {
        Self {
            driver,
            air: None,
            light: None,
        }
    }

    /// walk both probe tables once and bind the first responder in each
    #[cfg(test)]
    pub fn detect(driver: Box<dyn ChipDriver>) -> Self {
        let mut backend = Self::unbound(driver);
        backend.redetect();
        backend
    }

    /// forget the bound chips and probe again (boot only)
    pub fn redetect(&mut self) {
        self.air = first_responder(self.driver.as_mut(), &AIR_PROBES);
        self.light = first_responder(self.driver.as_mut(), &LIGHT_PROBES);

        match self.air {
            Some((chip, addr)) => info!("[SENSOR] Air: {} @0x{:02X}", chip.name(), addr),
            None => warn!("[SENSOR] Air: no sensor found"),
        }
        match self.light {
            Some((chip, addr)) => info!("[SENSOR] Light: {} @0x{:02X}", chip.name(), addr),
            None => warn!("[SENSOR] Light: no sensor found"),
        }
    }

    pub fn capability(&self) -> SensorCapability {
        SensorCapability {
            air: self.air.map(|(chip, _)| AirSensor::of(chip)).unwrap_or_default(),
            light: match self.light {
                Some((Chip::Veml6075, _)) => LightSensor::Veml6075,
                _ => LightSensor::None,
            },
        }
    }

    /// read both domains; a failed or absent chip just marks its domain invalid
    pub fn sample(&mut self) -> (AirReading, LightReading) {
        let air = match self.air {
            Some((chip, addr)) => match self.driver.read(chip, addr) {
                Ok(raw) => normalize_air(chip, &raw),
                Err(e) => {
                    warn!("[SENSOR] {} read failed: {:#}", chip.name(), e);
                    AirReading::invalid()
                }
            },
            None => AirReading::invalid(),
        };

        let light = match self.light {
            Some((chip, addr)) => match self.driver.read(chip, addr) {
                Ok(raw) => normalize_light(&raw),
                Err(e) => {
                    warn!("[SENSOR] {} read failed: {:#}", chip.name(), e);
                    LightReading::invalid()
                }
            },
            None => LightReading::invalid(),
        };

        debug!("[SENSOR] air={:?} light={:?}", air, light);
        (air, light)
    }
}

fn first_responder(driver: &mut dyn ChipDriver, table: &[(Chip, u8)]) -> Option<(Chip, u8)> {
    table
        .iter()
        .copied()
        .find(|&(chip, addr)| {
            let found = driver.probe(chip, addr);
            debug!("[SENSOR] probe {} @0x{:02X}: {}", chip.name(), addr, found);
            found
        })
}

/// fields each air chip actually measures: (humidity, pressure, gas)
fn air_fields(chip: Chip) -> (bool, bool, bool) {
    match chip {
        Chip::Bme680 => (true, true, true),
        Chip::Bme280 => (true, true, false),
        Chip::Bmp280 => (false, true, false),
        Chip::Sht3x | Chip::Shtc3 => (true, false, false),
        Chip::Veml6075 => (false, false, false),
    }
}

fn normalize_air(chip: Chip, raw: &RawSample) -> AirReading {
    let (has_humidity, has_pressure, has_gas) = air_fields(chip);
    let take = |v: Option<f32>, wanted: bool| {
        v.filter(|_| wanted).and_then(|v| measured(v, AIR_SENTINEL))
    };

    let temperature = take(raw.temperature_c, true);
    let humidity = take(raw.humidity_pct, has_humidity);
    let pressure = take(raw.pressure_pa, has_pressure).map(|pa| pa / 100.0);
    let gas_resistance = take(raw.gas_ohms, has_gas).map(|ohms| ohms / 1000.0);

    let core_ok = match chip {
        Chip::Sht3x | Chip::Shtc3 => temperature.is_some() && humidity.is_some(),
        _ => temperature.is_some(),
    };
    if !core_ok {
        return AirReading::invalid();
    }

    AirReading {
        temperature,
        humidity,
        pressure,
        gas_resistance,
        valid: true,
    }
}

fn normalize_light(raw: &RawSample) -> LightReading {
    let take = |v: Option<f32>| v.and_then(|v| measured(v, AUX_SENTINEL));
    let uv_index = take(raw.uv_index);
    if uv_index.is_none() {
        return LightReading::invalid();
    }
    LightReading {
        uv_index,
        uva: take(raw.uva),
        uvb: take(raw.uvb),
        valid: true,
    }
}
