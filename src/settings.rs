//! ==============================================================================
//! settings.rs - durable station settings
//! ==============================================================================
//!
//! purpose:
//!     holds station identity, network credentials, coordinates and the
//!     upload interval. every field has a default that doubles as the
//!     "not configured yet" marker. writes hit disk immediately.
//!
//! persisted layout:
//!     a flat toml table keyed by the setting names:
//!         ssid, secret, apiKey, stationId, lat, lon, intervalMinutes
//!     missing keys fall back to their defaults on load.
//!
//! relationships:
//!     - mutated by: console.rs (commands), the file watcher below
//!     - read by: device.rs (boot gate, link credentials), controller.rs
//!
//! ==============================================================================

use anyhow::{anyhow, Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::console::Command;

pub const DEFAULT_SSID: &str = "YOUR_WIFI_SSID";
pub const DEFAULT_SECRET: &str = "YOUR_WIFI_SECRET";
pub const DEFAULT_API_KEY: &str = "YOUR_API_KEY_HERE";
pub const DEFAULT_STATION_ID: &str = "STATION_ID";
pub const DEFAULT_INTERVAL_MINUTES: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingKey {
    Ssid,
    Secret,
    ApiKey,
    StationId,
    Lat,
    Lon,
    IntervalMinutes,
}

impl SettingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::Ssid => "ssid",
            SettingKey::Secret => "secret",
            SettingKey::ApiKey => "apiKey",
            SettingKey::StationId => "stationId",
            SettingKey::Lat => "lat",
            SettingKey::Lon => "lon",
            SettingKey::IntervalMinutes => "intervalMinutes",
        }
    }

    /// canonical names plus the short console aliases, case-insensitive
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ssid" => Some(SettingKey::Ssid),
            "secret" | "pass" | "password" => Some(SettingKey::Secret),
            "apikey" | "api" => Some(SettingKey::ApiKey),
            "stationid" | "station" => Some(SettingKey::StationId),
            "lat" => Some(SettingKey::Lat),
            "lon" => Some(SettingKey::Lon),
            "intervalminutes" | "interval" => Some(SettingKey::IntervalMinutes),
            _ => None,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, SettingKey::Secret | SettingKey::ApiKey)
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// live station settings, always fully populated
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationConfig {
    pub ssid: String,
    pub secret: String,
    pub api_key: String,
    pub station_id: String,
    pub lat: f64,
    pub lon: f64,
    /// always >= 1
    pub interval_minutes: u32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            ssid: DEFAULT_SSID.to_string(),
            secret: DEFAULT_SECRET.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            station_id: DEFAULT_STATION_ID.to_string(),
            lat: 0.0,
            lon: 0.0,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
        }
    }
}

/// on-disk shape; anything missing takes the default
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredSettings {
    ssid: Option<String>,
    secret: Option<String>,
    api_key: Option<String>,
    station_id: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    interval_minutes: Option<i64>,
}

impl From<StoredSettings> for StationConfig {
    fn from(stored: StoredSettings) -> Self {
        let defaults = StationConfig::default();
        Self {
            ssid: stored.ssid.unwrap_or(defaults.ssid),
            secret: stored.secret.unwrap_or(defaults.secret),
            api_key: stored.api_key.unwrap_or(defaults.api_key),
            station_id: stored.station_id.unwrap_or(defaults.station_id),
            lat: stored.lat.unwrap_or(defaults.lat),
            lon: stored.lon.unwrap_or(defaults.lon),
            interval_minutes: stored
                .interval_minutes
                .map(clamp_interval)
                .unwrap_or(defaults.interval_minutes),
        }
    }
}

fn clamp_interval(raw: i64) -> u32 {
    raw.clamp(1, i64::from(u32::MAX)) as u32
}

fn parse_coordinate(raw: &str) -> Result<f64> {
    let normalized = raw.trim().replace(',', ".");
    let value: f64 = normalized
        .parse()
        .with_context(|| format!("'{}' is not a coordinate", raw.trim()))?;
    if !value.is_finite() {
        return Err(anyhow!("'{}' is not a coordinate", raw.trim()));
    }
    Ok(value)
}

pub struct SettingsStore {
    path: PathBuf,
    config: StationConfig,
}

impl SettingsStore {
    /// open the store at `path`; a missing or unreadable file means defaults
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let config = match read_file(&path) {
            Ok(Some(config)) => {
                info!("[SETTINGS] Loaded from {}", path.display());
                config
            }
            Ok(None) => {
                info!("[SETTINGS] {} not found - using defaults", path.display());
                StationConfig::default()
            }
            Err(e) => {
                warn!("[SETTINGS] {:#} - using defaults", e);
                StationConfig::default()
            }
        };
        Self { path, config }
    }

    /// re-read the file after an outside edit; keeps the current values if
    /// the file is gone or broken
    pub fn reload(&mut self) -> Result<()> {
        match read_file(&self.path)? {
            Some(config) => {
                if config != self.config {
                    info!("[SETTINGS] Reloaded from {}", self.path.display());
                }
                self.config = config;
            }
            None => debug!("[SETTINGS] {} vanished, keeping values", self.path.display()),
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn interval_minutes(&self) -> u32 {
        self.config.interval_minutes
    }

    /// false while the ssid is empty or still the factory placeholder
    pub fn is_configured(&self) -> bool {
        let ssid = self.config.ssid.trim();
        !ssid.is_empty() && ssid != DEFAULT_SSID
    }

    pub fn get(&self, key: SettingKey) -> String {
        match key {
            SettingKey::Ssid => self.config.ssid.clone(),
            SettingKey::Secret => self.config.secret.clone(),
            SettingKey::ApiKey => self.config.api_key.clone(),
            SettingKey::StationId => self.config.station_id.clone(),
            SettingKey::Lat => self.config.lat.to_string(),
            SettingKey::Lon => self.config.lon.to_string(),
            SettingKey::IntervalMinutes => self.config.interval_minutes.to_string(),
        }
    }

    /// value safe for logs and the console: credentials show their length only
    pub fn masked(&self, key: SettingKey) -> String {
        let value = self.get(key);
        if key.is_secret() {
            format!("<{} chars>", value.chars().count())
        } else {
            value
        }
    }

    /// parse `raw` for `key`, persist the whole store, then apply it
    ///
    /// nothing changes in memory unless the write succeeded.
    pub fn set(&mut self, key: SettingKey, raw: &str) -> Result<()> {
        let raw = raw.trim();
        let mut next = self.config.clone();
        match key {
            SettingKey::Ssid => next.ssid = raw.to_string(),
            SettingKey::Secret => next.secret = raw.to_string(),
            SettingKey::ApiKey => next.api_key = raw.to_string(),
            SettingKey::StationId => next.station_id = raw.to_string(),
            SettingKey::Lat => next.lat = parse_coordinate(raw)?,
            SettingKey::Lon => next.lon = parse_coordinate(raw)?,
            SettingKey::IntervalMinutes => {
                let minutes: i64 = raw
                    .parse()
                    .with_context(|| format!("'{}' is not a number of minutes", raw))?;
                next.interval_minutes = clamp_interval(minutes);
            }
        }
        self.persist(&next)?;
        self.config = next;
        info!("[SETTINGS] {} = {}", key, self.masked(key));
        Ok(())
    }

    fn persist(&self, config: &StationConfig) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let body = toml::to_string_pretty(config).context("encoding settings")?;

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Option<StationConfig>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let stored: StoredSettings =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(stored.into()))
}

/// watch the settings file and queue a reload whenever it changes on disk
///
/// watches the parent directory so editors that replace the file are seen.
/// the returned watcher must be kept alive.
pub fn watch(path: &Path, tx: UnboundedSender<Command>) -> Result<RecommendedWatcher> {
    let dir = match path.parent().filter(|d| !d.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| anyhow!("settings path {} has no file name", path.display()))?;

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                let touched = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if touched && (event.kind.is_modify() || event.kind.is_create()) {
                    let _ = tx.send(Command::Reload);
                }
            }
            Err(e) => warn!("[SETTINGS] watch error: {}", e),
        }
    })?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {}", dir.display()))?;
    info!("[SETTINGS] Watching {} for changes", dir.display());
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch_path as scratch;

    #[test]
    fn missing_file_is_unconfigured_defaults() {
        let store = SettingsStore::open(scratch("missing"));
        assert_eq!(store.config(), &StationConfig::default());
        assert!(!store.is_configured());
    }

    #[test]
    fn set_persists_and_survives_reopen() {
        let path = scratch("persist");
        let mut store = SettingsStore::open(&path);
        store.set(SettingKey::Ssid, "field-ap").unwrap();
        store.set(SettingKey::Lat, "52,5200").unwrap();
        store.set(SettingKey::IntervalMinutes, "15").unwrap();
        assert!(store.is_configured());

        let reopened = SettingsStore::open(&path);
        assert_eq!(reopened.config().ssid, "field-ap");
        assert!((reopened.config().lat - 52.52).abs() < 1e-9);
        assert_eq!(reopened.interval_minutes(), 15);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn interval_is_clamped_on_set_and_load() {
        let path = scratch("clamp");
        let mut store = SettingsStore::open(&path);
        store.set(SettingKey::IntervalMinutes, "0").unwrap();
        assert_eq!(store.interval_minutes(), 1);

        std::fs::write(&path, "intervalMinutes = -5\nssid = \"x\"\n").unwrap();
        store.reload().unwrap();
        assert_eq!(store.interval_minutes(), 1);
        assert_eq!(store.config().station_id, DEFAULT_STATION_ID);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn bad_values_are_rejected_without_change() {
        let path = scratch("reject");
        let mut store = SettingsStore::open(&path);
        assert!(store.set(SettingKey::Lon, "east").is_err());
        assert!(store.set(SettingKey::IntervalMinutes, "soon").is_err());
        assert_eq!(store.config().lon, 0.0);
        assert_eq!(store.interval_minutes(), DEFAULT_INTERVAL_MINUTES);
    }

    #[test]
    fn failed_write_leaves_value_unchanged() {
        let path = scratch("blocked");
        let dir = path.parent().unwrap().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        // a plain file where the settings directory should be
        let blocker = dir.join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let mut store = SettingsStore::open(blocker.join("settings.toml"));
        assert!(store.set(SettingKey::Ssid, "field-ap").is_err());
        assert_eq!(store.config().ssid, DEFAULT_SSID);
        assert!(!store.is_configured());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn outside_edit_queues_reload() {
        let path = scratch("watch");
        let mut store = SettingsStore::open(&path);
        store.set(SettingKey::Ssid, "field-ap").unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _watcher = watch(&path, tx).unwrap();
        std::fs::write(&path, "ssid = \"other-ap\"\n").unwrap();

        let queued = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("no reload queued");
        assert_eq!(queued, Some(Command::Reload));

        store.reload().unwrap();
        assert_eq!(store.config().ssid, "other-ap");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn empty_ssid_is_unconfigured() {
        let path = scratch("empty-ssid");
        let mut store = SettingsStore::open(&path);
        store.set(SettingKey::Ssid, "   ").unwrap();
        assert!(!store.is_configured());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn aliases_and_masking() {
        assert_eq!(SettingKey::parse("pass"), Some(SettingKey::Secret));
        assert_eq!(SettingKey::parse("API"), Some(SettingKey::ApiKey));
        assert_eq!(SettingKey::parse("station"), Some(SettingKey::StationId));
        assert_eq!(SettingKey::parse("interval"), Some(SettingKey::IntervalMinutes));
        assert_eq!(SettingKey::parse("colour"), None);

        let store = SettingsStore::open(scratch("mask"));
        assert_eq!(store.masked(SettingKey::ApiKey), "<17 chars>");
        assert_eq!(store.masked(SettingKey::Ssid), DEFAULT_SSID);
    }
}
