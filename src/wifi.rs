//! ==============================================================================
//! wifi.rs - radio backends
//! ==============================================================================
//!
//! purpose:
//!     the link manager only needs "start associating", "are we associated",
//!     "try again" and a wall clock. this file provides that for two setups:
//!
//!     - SystemRadio: the OS (systemd-networkd, dhcpcd, a desktop) already owns
//!       the network. we just observe whether a routable address exists.
//!     - NmcliRadio: drive NetworkManager with the stored ssid/secret.
//!
//! the wall clock is the system clock in both cases; ntp is the OS's job.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use std::net::{IpAddr, UdpSocket};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub trait Radio: Send {
    /// begin associating with `ssid`; false if the request could not be issued
    fn associate(&mut self, ssid: &str, secret: &str) -> bool;
    fn is_associated(&mut self) -> bool;
    /// retry the last association
    fn reconnect(&mut self);
    /// unix seconds
    fn now_epoch(&self) -> u64;
    fn minute_of_hour(&self) -> u32 {
        ((self.now_epoch() / 60) % 60) as u32
    }
    fn ip_address(&self) -> Option<IpAddr>;
}

/// current unix time in seconds; 0 if the clock is before 1970
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// address of the interface holding the default route, if any
///
/// connecting a udp socket sends nothing; it only asks the kernel to pick a
/// route and source address.
pub fn routable_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified() && !ip.is_loopback()).then_some(ip)
}

// ==============================================================================
// system radio
// ==============================================================================

#[derive(Default)]
pub struct SystemRadio;

impl Radio for SystemRadio {
    fn associate(&mut self, ssid: &str, _secret: &str) -> bool {
        info!("[WIFI] Network managed by the OS (configured ssid '{}')", ssid);
        true
    }

    fn is_associated(&mut self) -> bool {
        routable_address().is_some()
    }

    fn reconnect(&mut self) {
        debug!("[WIFI] Waiting for the OS to restore the network");
    }

    fn now_epoch(&self) -> u64 {
        unix_now()
    }

    fn ip_address(&self) -> Option<IpAddr> {
        routable_address()
    }
}

// ==============================================================================
// networkmanager radio
// ==============================================================================

/// how long an nmcli state query stays fresh
const STATE_CACHE: Duration = Duration::from_secs(1);

pub struct NmcliRadio {
    interface: String,
    credentials: Option<(String, String)>,
    /// in-flight `nmcli dev wifi connect`
    pending: Option<Child>,
    cached: Option<(Instant, bool)>,
}

impl NmcliRadio {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            credentials: None,
            pending: None,
            cached: None,
        }
    }

    fn spawn_connect(&mut self) -> Result<()> {
        if self.reap() {
            debug!("[WIFI] connect already in flight");
            return Ok(());
        }
        let Some((ssid, secret)) = &self.credentials else {
            return Ok(());
        };
        let mut cmd = Command::new("nmcli");
        cmd.args(["dev", "wifi", "connect", ssid.as_str()]);
        if !secret.is_empty() {
            cmd.args(["password", secret.as_str()]);
        }
        cmd.args(["ifname", self.interface.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd.spawn().context("spawning nmcli")?;
        self.pending = Some(child);
        self.cached = None;
        Ok(())
    }

    /// true while a connect child is still running
    fn reap(&mut self) -> bool {
        match self.pending.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                if !status.success() {
                    warn!("[WIFI] nmcli connect exited with {}", status);
                }
                self.pending = None;
                false
            }
            Some(Err(e)) => {
                warn!("[WIFI] lost track of nmcli: {}", e);
                self.pending = None;
                false
            }
            None => false,
        }
    }

    fn query_state(&self) -> Result<bool> {
        let out = Command::new("nmcli")
            .args(["-t", "-f", "DEVICE,STATE", "dev"])
            .output()
            .context("running nmcli")?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(device_connected(&stdout, &self.interface))
    }
}

/// parse `nmcli -t -f DEVICE,STATE dev` output for one interface
pub fn device_connected(output: &str, interface: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .any(|(dev, state)| dev == interface && state.trim() == "connected")
}

impl Radio for NmcliRadio {
    fn associate(&mut self, ssid: &str, secret: &str) -> bool {
        info!("[WIFI] Connecting to '{}' via nmcli on {}", ssid, self.interface);
        self.credentials = Some((ssid.to_string(), secret.to_string()));
        match self.spawn_connect() {
            Ok(()) => true,
            Err(e) => {
                warn!("[WIFI] {:#}", e);
                false
            }
        }
    }

    fn is_associated(&mut self) -> bool {
        self.reap();
        if let Some((at, up)) = self.cached {
            if at.elapsed() < STATE_CACHE {
                return up;
            }
        }
        let up = self.query_state().unwrap_or_else(|e| {
            debug!("[WIFI] state query failed: {:#}", e);
            false
        });
        self.cached = Some((Instant::now(), up));
        up
    }

    fn reconnect(&mut self) {
        if let Err(e) = self.spawn_connect() {
            warn!("[WIFI] reconnect failed: {:#}", e);
        }
    }

    fn now_epoch(&self) -> u64 {
        unix_now()
    }

    fn ip_address(&self) -> Option<IpAddr> {
        routable_address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nmcli_device_parsing() {
        let out = "wlan0:connected\neth0:unavailable\nlo:connected (externally)\n";
        assert!(device_connected(out, "wlan0"));
        assert!(!device_connected(out, "eth0"));
        assert!(!device_connected(out, "lo"));
        assert!(!device_connected("wlan0:disconnected\n", "wlan0"));
        assert!(!device_connected("", "wlan0"));
    }

    struct FixedClock(u64);

    impl Radio for FixedClock {
        fn associate(&mut self, _: &str, _: &str) -> bool {
            true
        }
        fn is_associated(&mut self) -> bool {
            true
        }
        fn reconnect(&mut self) {}
        fn now_epoch(&self) -> u64 {
            self.0
        }
        fn ip_address(&self) -> Option<IpAddr> {
            None
        }
    }

    #[test]
    fn minute_of_hour_from_epoch() {
        // 2024-06-01T12:47:30Z
        assert_eq!(FixedClock(1_717_246_050).minute_of_hour(), 47);
        assert_eq!(FixedClock(0).minute_of_hour(), 0);
    }
}
