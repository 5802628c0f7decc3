//! ==============================================================================
//! gpio.rs - status led
//! ==============================================================================
//!
//! purpose:
//!     a single led on a gpio pin that mirrors the link state: lit while
//!     connected, dark otherwise.
//!
//! relationships:
//!     - driven by: link.rs (on every state change)
//!     - uses: hal.rs (write_gpio)
//!
//! ==============================================================================

use std::sync::Arc;

use crate::hal::HardwareProvider;

pub struct StatusLed {
    hw: Arc<dyn HardwareProvider>,
    pin: u8,
    /// last level written; None until the first write
    lit: Option<bool>,
}

impl StatusLed {
    pub fn new(hw: Arc<dyn HardwareProvider>, pin: u8) -> Self {
        Self { hw, pin, lit: None }
    }

    /// drive the pin, touching the hardware only when the level changes
    pub fn set(&mut self, on: bool) {
        if self.lit == Some(on) {
            return;
        }
        match self.hw.write_gpio(self.pin, on) {
            Ok(()) => self.lit = Some(on),
            Err(e) => tracing::warn!("[LED] pin {} write failed: {}", self.pin, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBus;

    #[test]
    fn writes_only_on_change() {
        let bus = Arc::new(FakeBus::default());
        let mut led = StatusLed::new(bus.clone(), 17);

        led.set(true);
        led.set(true);
        led.set(false);
        led.set(false);
        led.set(true);

        assert_eq!(bus.gpio_writes(), vec![(17, true), (17, false), (17, true)]);
        assert_eq!(led.lit, Some(true));
    }
}
