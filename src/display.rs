//! ==============================================================================
//! display.rs - paged status display
//! ==============================================================================
//!
//! purpose:
//!     the station's screen is tiny (21 columns of text), so status is split
//!     into pages that rotate every few seconds:
//!
//!         NETWORK -> WEATHER -> RAIN -> WIND -> UV / LIGHT -> NETWORK ...
//!
//!     every page shares a footer with the link status and the last banner
//!     (upload result, errors).
//!
//! relationships:
//!     - fed by: controller.rs (readings, banner), device.rs (network info,
//!       boot messages)
//!     - draws to: any `Screen`; `LogScreen` writes frames to the log
//!
//! ==============================================================================

use anyhow::Result;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::domain::{
    measured, AirReading, LightReading, RainReading, WindReading, AIR_SENTINEL, AUX_SENTINEL,
};

pub const PAGE_DWELL: Duration = Duration::from_secs(5);
/// characters per row at the default font
pub const COLUMNS: usize = 21;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Page {
    Network,
    Air,
    Rain,
    Wind,
    Light,
}

impl Page {
    pub fn next(self) -> Self {
        match self {
            Page::Network => Page::Air,
            Page::Air => Page::Rain,
            Page::Rain => Page::Wind,
            Page::Wind => Page::Light,
            Page::Light => Page::Network,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Page::Network => "NETWORK",
            Page::Air => "WEATHER",
            Page::Rain => "RAIN",
            Page::Wind => "WIND",
            Page::Light => "UV / LIGHT",
        }
    }
}

/// one screenful of text
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub title: String,
    pub lines: Vec<String>,
    pub footer: String,
}

impl Frame {
    /// title centered between dashes, padded to the screen width
    pub fn header(&self) -> String {
        if self.title.is_empty() {
            return String::new();
        }
        let label = format!(" {} ", self.title);
        let width = label.chars().count();
        if width >= COLUMNS {
            return label.trim().to_string();
        }
        let left = (COLUMNS - width) / 2;
        let right = COLUMNS - width - left;
        format!("{}{}{}", "-".repeat(left), label, "-".repeat(right))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header();
        if !header.is_empty() {
            writeln!(f, "{}", header)?;
        }
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        if !self.footer.is_empty() {
            write!(f, "{}", self.footer)?;
        }
        Ok(())
    }
}

/// the pixel side of the display
pub trait Screen: Send {
    fn present(&mut self, frame: &Frame) -> Result<()>;
}

/// writes each new frame to the log; stands in for a panel on headless hosts
#[derive(Default)]
pub struct LogScreen {
    last: Option<Frame>,
}

impl Screen for LogScreen {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        if self.last.as_ref() == Some(frame) {
            return Ok(());
        }
        if frame.title.is_empty() {
            // boot / setup messages
            info!("[DISPLAY] {}", frame.lines.join(" "));
        } else {
            debug!("[DISPLAY]\n{}", frame);
        }
        self.last = Some(frame.clone());
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct NetworkInfo {
    ssid: String,
    ip: String,
    status: String,
    connected: bool,
}

pub struct DisplayPager {
    screen: Option<Box<dyn Screen>>,
    page: Page,
    last_switch: Option<Instant>,
    air: AirReading,
    light: LightReading,
    wind: WindReading,
    rain: RainReading,
    network: NetworkInfo,
    banner: Option<(String, bool)>,
}

impl DisplayPager {
    /// `None` means no panel was found; every call becomes a no-op
    pub fn new(screen: Option<Box<dyn Screen>>) -> Self {
        if screen.is_none() {
            info!("[DISPLAY] No display - pager disabled");
        }
        Self {
            screen,
            page: Page::Network,
            last_switch: None,
            air: AirReading::invalid(),
            light: LightReading::invalid(),
            wind: WindReading::unavailable(),
            rain: RainReading::unavailable(),
            network: NetworkInfo::default(),
            banner: None,
        }
    }

    #[cfg(test)]
    pub fn is_enabled(&self) -> bool {
        self.screen.is_some()
    }

    #[cfg(test)]
    pub fn page(&self) -> Page {
        self.page
    }

    pub fn set_air_data(&mut self, air: AirReading) {
        self.air = air;
    }

    pub fn set_light_data(&mut self, light: LightReading) {
        self.light = light;
    }

    pub fn set_wind_data(&mut self, wind: WindReading) {
        self.wind = wind;
    }

    pub fn set_rain_data(&mut self, rain: RainReading) {
        self.rain = rain;
    }

    pub fn set_network_info(&mut self, ssid: &str, ip: &str, status: &str, connected: bool) {
        self.network = NetworkInfo {
            ssid: ssid.to_string(),
            ip: ip.to_string(),
            status: status.to_string(),
            connected,
        };
    }

    /// banner shown in the footer until the next call
    pub fn set_status(&mut self, message: &str, is_error: bool) {
        self.banner = Some((message.to_string(), is_error));
    }

    /// full-screen text, replaced by the next `render`
    pub fn show_message(&mut self, message: &str) {
        let Some(screen) = self.screen.as_mut() else {
            return;
        };
        let frame = Frame {
            title: String::new(),
            lines: message.lines().map(str::to_string).collect(),
            footer: String::new(),
        };
        if let Err(e) = screen.present(&frame) {
            debug!("[DISPLAY] present failed: {:#}", e);
        }
    }

    /// rotate if the dwell is up, then draw the current page
    pub fn render(&mut self, now: Instant) {
        if self.screen.is_none() {
            return;
        }
        match self.last_switch {
            None => self.last_switch = Some(now),
            Some(at) if now.saturating_duration_since(at) >= PAGE_DWELL => {
                self.page = self.page.next();
                self.last_switch = Some(now);
            }
            Some(_) => {}
        }

        let frame = self.frame();
        if let Some(screen) = self.screen.as_mut() {
            if let Err(e) = screen.present(&frame) {
                debug!("[DISPLAY] present failed: {:#}", e);
            }
        }
    }

    /// the current page as text
    pub fn frame(&self) -> Frame {
        Frame {
            title: self.page.title().to_string(),
            lines: self.body(),
            footer: self.footer(),
        }
    }

    fn body(&self) -> Vec<String> {
        match self.page {
            Page::Network => vec![
                format!("SSID: {}", self.network.ssid),
                format!("IP:   {}", if self.network.ip.is_empty() { "-" } else { &self.network.ip }),
            ],
            Page::Air => {
                let ok = self.air.valid;
                vec![
                    format!("Temp: {}", value(self.air.temperature, ok, AIR_SENTINEL, 1, " C")),
                    format!("Hum:  {}", value(self.air.humidity, ok, AIR_SENTINEL, 0, " %")),
                    format!("Pres: {}", value(self.air.pressure, ok, AIR_SENTINEL, 0, " hPa")),
                    format!("Gas:  {}", value(self.air.gas_resistance, ok, AIR_SENTINEL, 1, " kOhm")),
                ]
            }
            Page::Rain => {
                let ok = self.rain.valid;
                vec![
                    format!("Rate:  {}", value(self.rain.rate, ok, AUX_SENTINEL, 1, " mm/h")),
                    format!("Daily: {}", value(self.rain.daily, ok, AUX_SENTINEL, 1, " mm")),
                ]
            }
            Page::Wind => {
                let ok = self.wind.valid;
                vec![
                    format!("Speed: {}", value(self.wind.speed, ok, AUX_SENTINEL, 1, " m/s")),
                    format!("Dir:   {}", value(self.wind.direction, ok, AUX_SENTINEL, 0, " dg")),
                ]
            }
            Page::Light => {
                let ok = self.light.valid;
                vec![
                    format!("UV Index: {}", value(self.light.uv_index, ok, AUX_SENTINEL, 1, "")),
                    format!("UVA:      {}", value(self.light.uva, ok, AUX_SENTINEL, 0, "")),
                    format!("UVB:      {}", value(self.light.uvb, ok, AUX_SENTINEL, 0, "")),
                ]
            }
        }
    }

    fn footer(&self) -> String {
        let status = if self.network.status.is_empty() {
            if self.network.connected { "Online" } else { "Offline" }
        } else {
            self.network.status.as_str()
        };
        match &self.banner {
            Some((msg, true)) => format!("Stat: {} | !{}", status, msg),
            Some((msg, false)) => format!("Stat: {} | {}", status, msg),
            None => format!("Stat: {}", status),
        }
    }
}

/// "NaN" for anything absent, sentinel, non-finite or from an invalid domain
fn value(v: Option<f32>, valid: bool, sentinel: f32, decimals: usize, unit: &str) -> String {
    match v.filter(|_| valid).and_then(|v| measured(v, sentinel)) {
        Some(v) => format!("{:.*}{}", decimals, v, unit),
        None => "NaN".to_string(),
    }
}
