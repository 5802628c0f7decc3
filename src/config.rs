//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `station.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - PollingConfig: tick period of the control loop.
//!     - LinkConfig: which radio backend keeps the network up.
//!     - UploadConfig: ingest endpoint and request timeout.
//!     - SensorsConfig: i2c bus number and status led pin.
//!     - ServerConfig: the local status endpoint.
//!     - StorageConfig: where the station settings live.
//!
//! note:
//!     this is the *host* configuration. station identity, credentials and
//!     the upload interval are in the settings store (settings.rs), which the
//!     console can rewrite at runtime.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_INGEST_URL: &str = "https://wx-api.deeplabstudio.com/v1/ingest/weather";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub polling: PollingConfig,
    pub link: LinkConfig,
    pub upload: UploadConfig,
    pub display: DisplayConfig,
    pub sensors: SensorsConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub tick_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { tick_ms: 100 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// the OS already manages the network; we only observe it
    #[default]
    System,
    /// drive association through NetworkManager's cli
    Nmcli,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LinkConfig {
    pub mode: LinkMode,
    pub interface: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::System,
            interface: "wlan0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_INGEST_URL.to_string(),
            timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorsConfig {
    pub i2c_bus: u8,
    /// led mirroring the link state; none = no led fitted
    pub status_led_pin: Option<u8>,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            status_led_pin: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub settings_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("data").join("settings.toml"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before the tracing subscriber exists (the log level lives in
    /// here), so it reports through stdout.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("station.toml"),
            PathBuf::from("..").join("config").join("station.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        tracing::info!("┌─────────────────────────────────────────┐");
        tracing::info!("│          STATION CONFIGURATION          │");
        tracing::info!("├─────────────────────────────────────────┤");
        tracing::info!("│ Tick: {}ms", self.polling.tick_ms);
        tracing::info!("│ Link: {:?} ({})", self.link.mode, self.link.interface);
        tracing::info!("│ Endpoint: {}", self.upload.endpoint);
        tracing::info!("│ Timeout: {}s", self.upload.timeout_seconds);
        tracing::info!("│ I2C bus: {}", self.sensors.i2c_bus);
        tracing::info!("│ Display: {}", if self.display.enabled { "on" } else { "off" });
        tracing::info!(
            "│ Status server: {}",
            if self.server.enabled { self.server.bind.as_str() } else { "off" }
        );
        tracing::info!("│ Settings: {}", self.storage.settings_path.display());
        tracing::info!("└─────────────────────────────────────────┘");
    }
}
