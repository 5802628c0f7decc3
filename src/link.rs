//! ==============================================================================
//! link.rs - link manager
//! ==============================================================================
//!
//! purpose:
//!     keeps the wireless link up and answers "are we online" and "what time
//!     is it" for the rest of the station.
//!
//! state machine:
//!     Disconnected --start / cooldown expired--> Connecting
//!     Connecting   --associated--------------> Connected
//!     Connecting   --budget exhausted--------> Disconnected
//!     Connected    --radio lost association--> Disconnected
//!
//!     reconnects are never issued more than once per cooldown. only the boot
//!     association blocks, and only for a bounded number of polls.
//!
//! ==============================================================================

use serde::Serialize;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::gpio::StatusLed;
use crate::wifi::Radio;

/// 2024-01-01T00:00:00Z; anything earlier means the clock was never set
pub const CLOCK_VALID_AFTER: u64 = 1_704_067_200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn label(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Connected => "Connected",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LinkPolicy {
    pub boot_attempts: u32,
    pub boot_poll: Duration,
    pub reconnect_cooldown: Duration,
    pub connect_budget: Duration,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            boot_attempts: 20,
            boot_poll: Duration::from_millis(500),
            reconnect_cooldown: Duration::from_secs(10),
            connect_budget: Duration::from_secs(10),
        }
    }
}

pub struct LinkManager {
    radio: Box<dyn Radio>,
    policy: LinkPolicy,
    state: LinkState,
    ssid: String,
    connecting_since: Option<Instant>,
    last_reconnect: Option<Instant>,
    led: Option<StatusLed>,
}

impl LinkManager {
    pub fn new(radio: Box<dyn Radio>, policy: LinkPolicy) -> Self {
        Self {
            radio,
            policy,
            state: LinkState::Disconnected,
            ssid: String::new(),
            connecting_since: None,
            last_reconnect: None,
            led: None,
        }
    }

    pub fn with_led(mut self, led: StatusLed) -> Self {
        self.led = Some(led);
        self
    }

    /// boot association: ask the radio to join, then poll a bounded number
    /// of times. returns whether the link came up.
    pub async fn start(&mut self, ssid: &str, secret: &str) -> bool {
        self.ssid = ssid.to_string();
        info!("[LINK] Associating with '{}' (secret {} chars)", ssid, secret.chars().count());

        let started = Instant::now();
        self.set_state(LinkState::Connecting, started);
        if !self.radio.associate(ssid, secret) {
            warn!("[LINK] Radio refused the association request");
        }

        for attempt in 0..self.policy.boot_attempts {
            if self.radio.is_associated() {
                self.set_state(LinkState::Connected, Instant::now());
                return true;
            }
            // blink while we wait
            if let Some(led) = self.led.as_mut() {
                led.set(attempt % 2 == 0);
            }
            tokio::time::sleep(self.policy.boot_poll).await;
        }

        let now = Instant::now();
        warn!("[LINK] No association after boot window; retrying from the loop");
        self.last_reconnect = Some(now);
        self.set_state(LinkState::Disconnected, now);
        false
    }

    /// advance the state machine; call once per tick
    pub fn update(&mut self, now: Instant) {
        match self.state {
            LinkState::Connected => {
                if !self.radio.is_associated() {
                    warn!("[LINK] Link dropped");
                    self.set_state(LinkState::Disconnected, now);
                }
            }
            LinkState::Connecting => {
                if self.radio.is_associated() {
                    self.set_state(LinkState::Connected, now);
                } else if self
                    .connecting_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= self.policy.connect_budget)
                {
                    warn!("[LINK] Connect attempt timed out");
                    self.set_state(LinkState::Disconnected, now);
                }
            }
            LinkState::Disconnected => {
                if self.radio.is_associated() {
                    // came back on its own
                    self.set_state(LinkState::Connected, now);
                } else if self.reconnect_due(now) {
                    info!("[LINK] Reconnecting to '{}'", self.ssid);
                    self.last_reconnect = Some(now);
                    self.radio.reconnect();
                    self.set_state(LinkState::Connecting, now);
                }
            }
        }
    }

    fn reconnect_due(&self, now: Instant) -> bool {
        match self.last_reconnect {
            Some(last) => now.saturating_duration_since(last) >= self.policy.reconnect_cooldown,
            None => true,
        }
    }

    fn set_state(&mut self, next: LinkState, now: Instant) {
        if next != self.state {
            info!("[LINK] {} -> {}", self.state.label(), next.label());
        }
        self.connecting_since = match next {
            LinkState::Connecting => Some(now),
            _ => None,
        };
        self.state = next;
        if let Some(led) = self.led.as_mut() {
            led.set(next == LinkState::Connected);
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn status_label(&self) -> &'static str {
        self.state.label()
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn ip_address(&self) -> Option<IpAddr> {
        if self.is_connected() {
            self.radio.ip_address()
        } else {
            None
        }
    }

    /// unix seconds, None until the clock has been set
    pub fn current_epoch(&self) -> Option<u64> {
        let now = self.radio.now_epoch();
        (now >= CLOCK_VALID_AFTER).then_some(now)
    }

    pub fn current_minute(&self) -> Option<u32> {
        self.current_epoch().map(|_| self.radio.minute_of_hour())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRadio;

    fn quick_policy() -> LinkPolicy {
        LinkPolicy {
            boot_attempts: 3,
            boot_poll: Duration::from_millis(1),
            ..LinkPolicy::default()
        }
    }

    #[tokio::test]
    async fn boot_association_succeeds() {
        let radio = FakeRadio::new();
        radio.set_associated(true);
        let mut link = LinkManager::new(Box::new(radio.clone()), quick_policy());

        assert!(link.start("field-ap", "pw").await);
        assert!(link.is_connected());
        assert_eq!(radio.associations(), vec!["field-ap".to_string()]);
    }

    #[tokio::test]
    async fn boot_gives_up_after_budgeted_polls() {
        let radio = FakeRadio::new();
        let mut link = LinkManager::new(Box::new(radio.clone()), quick_policy());

        assert!(!link.start("field-ap", "pw").await);
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(radio.polls(), 3);
    }

    #[tokio::test]
    async fn reconnects_respect_cooldown() {
        let radio = FakeRadio::new();
        let mut link = LinkManager::new(Box::new(radio.clone()), quick_policy());
        link.start("field-ap", "pw").await;
        let t0 = Instant::now();

        // the boot attempt counts as the first try
        link.update(t0);
        assert_eq!(radio.reconnects(), 0);

        link.update(t0 + Duration::from_secs(11));
        assert_eq!(radio.reconnects(), 1);
        assert_eq!(link.state(), LinkState::Connecting);

        // budget runs out without association
        link.update(t0 + Duration::from_secs(15));
        assert_eq!(link.state(), LinkState::Connecting);
        link.update(t0 + Duration::from_secs(21));
        assert_eq!(link.state(), LinkState::Disconnected);

        link.update(t0 + Duration::from_secs(22));
        assert_eq!(radio.reconnects(), 2);
    }

    #[tokio::test]
    async fn drop_and_recovery() {
        let radio = FakeRadio::new();
        radio.set_associated(true);
        let mut link = LinkManager::new(Box::new(radio.clone()), quick_policy());
        link.start("field-ap", "pw").await;
        let t0 = Instant::now();

        radio.set_associated(false);
        link.update(t0);
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.ip_address().is_none());

        // first reconnect after a drop is immediate
        link.update(t0 + Duration::from_millis(100));
        assert_eq!(radio.reconnects(), 1);

        radio.set_associated(true);
        link.update(t0 + Duration::from_millis(200));
        assert!(link.is_connected());
    }

    #[test]
    fn clock_before_2024_is_unsynced() {
        let radio = FakeRadio::new();
        let link = LinkManager::new(Box::new(radio.clone()), LinkPolicy::default());

        radio.set_epoch(1_000);
        assert_eq!(link.current_epoch(), None);
        assert_eq!(link.current_minute(), None);

        radio.set_epoch(CLOCK_VALID_AFTER + 47 * 60);
        assert_eq!(link.current_minute(), Some(47));
    }
}
