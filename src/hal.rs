//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the two pieces of raw hardware the
//!     station touches: the I2C bus the sensor chips hang off, and a GPIO pin
//!     for the status LED.
//!
//! design philosophy:
//!     - "Compile Anywhere": the default build runs on any Linux/Mac/Windows
//!       box against a simulated bus (SHT3x @ 0x44 + VEML6075 @ 0x10).
//!     - "Real when asked": with `--features hardware` the same trait is
//!       fulfilled by `rppal` on a Raspberry Pi.
//!
//! relationships:
//!     - used by: sensor/chips.rs (chip drivers), gpio.rs (status led)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::Result;
use std::sync::Arc;

pub trait HardwareProvider: Send + Sync {
    /// write `write_data` (may be empty) then read `read_len` bytes (may be 0)
    fn i2c_transfer(&self, addr: u8, write_data: &[u8], read_len: u32) -> Result<Vec<u8>>;
    fn write_gpio(&self, pin: u8, level: bool) -> Result<()>;
}

/// open the platform hardware for the given i2c bus number
pub fn open(i2c_bus: u8) -> Result<Arc<dyn HardwareProvider>> {
    Ok(Arc::new(Hal::new(i2c_bus)?))
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For development machines)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub use mock::Hal;

#[cfg(not(feature = "hardware"))]
mod mock {
    use super::HardwareProvider;
    use crate::sensor::sht::crc8;
    use anyhow::{bail, Result};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const SIM_SHT3X_ADDR: u8 = 0x44;
    const SIM_VEML6075_ADDR: u8 = 0x10;

    pub struct Hal {
        /// last command written to each simulated device
        pending: Mutex<HashMap<u8, Vec<u8>>>,
        samples: AtomicU32,
    }

    impl Hal {
        pub fn new(i2c_bus: u8) -> Result<Self> {
            tracing::info!("Using MOCK HAL (simulated i2c bus {})", i2c_bus);
            Ok(Self {
                pending: Mutex::new(HashMap::new()),
                samples: AtomicU32::new(0),
            })
        }

        fn sht3x_frame(&self) -> Vec<u8> {
            // slow wobble so the display visibly changes
            let n = self.samples.fetch_add(1, Ordering::Relaxed) % 20;
            let temp_c = 22.0 + n as f32 * 0.05;
            let humidity = 48.0 - n as f32 * 0.1;

            let t_raw = (((temp_c + 45.0) / 175.0) * 65535.0) as u16;
            let h_raw = ((humidity / 100.0) * 65535.0) as u16;
            let mut out = Vec::with_capacity(6);
            for word in [t_raw, h_raw] {
                let bytes = word.to_be_bytes();
                out.extend_from_slice(&bytes);
                out.push(crc8(&bytes));
            }
            out
        }

        fn sht3x(&self, write_data: &[u8], read_len: u32) -> Result<Vec<u8>> {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if !write_data.is_empty() {
                pending.insert(SIM_SHT3X_ADDR, write_data.to_vec());
            }
            if read_len == 0 {
                return Ok(vec![]);
            }
            let frame = match pending.get(&SIM_SHT3X_ADDR).map(Vec::as_slice) {
                Some([0xF3, 0x2D]) => {
                    let status = [0x00, 0x00];
                    vec![status[0], status[1], crc8(&status)]
                }
                Some([0x24, 0x00]) => self.sht3x_frame(),
                other => bail!("sht3x sim: unexpected read after {:02X?}", other),
            };
            Ok(frame.into_iter().take(read_len as usize).collect())
        }

        fn veml6075(&self, write_data: &[u8], read_len: u32) -> Result<Vec<u8>> {
            if read_len == 0 {
                return Ok(vec![]);
            }
            let value: u16 = match write_data.first() {
                Some(0x0C) => 0x0026, // device id
                Some(0x07) => 410,    // uva
                Some(0x09) => 520,    // uvb
                Some(0x0A) => 40,     // uvcomp1
                Some(0x0B) => 25,     // uvcomp2
                Some(0x00) => 0x0010, // conf
                other => bail!("veml6075 sim: unknown register {:02X?}", other),
            };
            Ok(value.to_le_bytes().into_iter().take(read_len as usize).collect())
        }
    }

    impl HardwareProvider for Hal {
        fn i2c_transfer(&self, addr: u8, write_data: &[u8], read_len: u32) -> Result<Vec<u8>> {
            let out = match addr {
                SIM_SHT3X_ADDR => self.sht3x(write_data, read_len)?,
                SIM_VEML6075_ADDR => self.veml6075(write_data, read_len)?,
                _ => bail!("no ack from 0x{:02X}", addr),
            };
            tracing::trace!(
                "[MOCK I2C] 0x{:02X} w={} r={}",
                addr,
                hex::encode(write_data),
                hex::encode(&out)
            );
            Ok(out)
        }

        fn write_gpio(&self, pin: u8, level: bool) -> Result<()> {
            tracing::debug!("[MOCK GPIO] Pin {} write {}", pin, level);
            Ok(())
        }
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Hal {
    bus: u8,
}

#[cfg(feature = "hardware")]
impl Hal {
    pub fn new(i2c_bus: u8) -> Result<Self> {
        tracing::info!("Using REAL HARDWARE HAL (rppal, i2c bus {})", i2c_bus);
        Ok(Self { bus: i2c_bus })
    }
}

#[cfg(feature = "hardware")]
impl HardwareProvider for Hal {
    fn i2c_transfer(&self, addr: u8, write_data: &[u8], read_len: u32) -> Result<Vec<u8>> {
        use rppal::i2c::I2c;
        let mut i2c = I2c::with_bus(self.bus)?;
        i2c.set_slave_address(addr as u16)?;

        let mut read_buf = vec![0u8; read_len as usize];
        match (write_data.is_empty(), read_buf.is_empty()) {
            (false, false) => i2c.write_read(write_data, &mut read_buf)?,
            (false, true) => {
                i2c.write(write_data)?;
            }
            (true, false) => {
                i2c.read(&mut read_buf)?;
            }
            (true, true) => {}
        }
        tracing::trace!(
            "[I2C] 0x{:02X} w={} r={}",
            addr,
            hex::encode(write_data),
            hex::encode(&read_buf)
        );
        Ok(read_buf)
    }

    fn write_gpio(&self, pin: u8, level: bool) -> Result<()> {
        use rppal::gpio::Gpio;
        let gpio = Gpio::new()?;
        let mut p = gpio.get(pin)?.into_output();
        // keep the level after the handle drops
        p.set_reset_on_drop(false);
        if level { p.set_high(); } else { p.set_low(); }
        Ok(())
    }
}

#[cfg(all(test, not(feature = "hardware")))]
mod tests {
    use super::*;

    #[test]
    fn simulated_bus_nacks_unknown_addresses() {
        let hal = Hal::new(1).unwrap();
        assert!(hal.i2c_transfer(0x76, &[0xD0], 1).is_err());
        assert!(hal.i2c_transfer(0x44, &[0xF3, 0x2D], 3).is_ok());
    }

    #[test]
    fn simulated_veml_reports_its_id() {
        let hal = Hal::new(1).unwrap();
        let id = hal.i2c_transfer(0x10, &[0x0C], 2).unwrap();
        assert_eq!(id, vec![0x26, 0x00]);
    }
}
