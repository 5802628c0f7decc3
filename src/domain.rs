use serde::{Deserialize, Serialize};

/// legacy "no data" marker for air fields
pub const AIR_SENTINEL: f32 = -999.0;
/// legacy "no data" marker for light, wind and rain fields
pub const AUX_SENTINEL: f32 = -1.0;

/// turn a raw value into a measurement, treating the domain sentinel and
/// non-finite numbers as absent
pub fn measured(value: f32, sentinel: f32) -> Option<f32> {
    if value.is_finite() && value != sentinel {
        Some(value)
    } else {
        None
    }
}

/// temperature / humidity / pressure / gas snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirReading {
    /// degrees celsius
    pub temperature: Option<f32>,
    /// relative humidity (0-100%)
    pub humidity: Option<f32>,
    /// pressure in hPa
    pub pressure: Option<f32>,
    /// gas resistance in KOhms (bme680 only)
    pub gas_resistance: Option<f32>,
    /// false means no field in this struct can be trusted
    pub valid: bool,
}

impl AirReading {
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// uv snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightReading {
    pub uv_index: Option<f32>,
    pub uva: Option<f32>,
    pub uvb: Option<f32>,
    pub valid: bool,
}

impl LightReading {
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// wind domain; no anemometer is wired up, so this is always a placeholder
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WindReading {
    /// metres per second
    pub speed: Option<f32>,
    /// degrees from north
    pub direction: Option<f32>,
    pub valid: bool,
}

impl WindReading {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// rain domain; same story as wind
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RainReading {
    /// mm per hour
    pub rate: Option<f32>,
    /// mm since midnight
    pub daily: Option<f32>,
    pub valid: bool,
}

impl RainReading {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// one full sample across every domain
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingSet {
    pub air: AirReading,
    pub light: LightReading,
    pub wind: WindReading,
    pub rain: RainReading,
}

impl ReadingSet {
    /// sensor domains plus the wind/rain placeholders
    pub fn sampled(air: AirReading, light: LightReading) -> Self {
        Self {
            air,
            light,
            wind: WindReading::unavailable(),
            rain: RainReading::unavailable(),
        }
    }
}

/// result of one upload attempt
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub attempted: bool,
    pub succeeded: bool,
    /// 0 = no attempt, negative = local failure, positive = http status
    pub error_code: i32,
}

impl UploadOutcome {
    pub const NO_LINK: i32 = -1;
    pub const CLOCK_NOT_SYNCED: i32 = -2;
    pub const TRANSPORT_ERROR: i32 = -3;

    pub fn not_attempted() -> Self {
        Self::default()
    }

    pub fn no_link() -> Self {
        Self::failed(Self::NO_LINK)
    }

    pub fn clock_not_synced() -> Self {
        Self::failed(Self::CLOCK_NOT_SYNCED)
    }

    pub fn transport_error() -> Self {
        Self::failed(Self::TRANSPORT_ERROR)
    }

    /// classify a remote http status; only 2xx counts as delivered
    pub fn from_status(status: u16) -> Self {
        Self {
            attempted: true,
            succeeded: (200..300).contains(&status),
            error_code: i32::from(status),
        }
    }

    fn failed(code: i32) -> Self {
        Self {
            attempted: true,
            succeeded: false,
            error_code: code,
        }
    }

    /// banner text for the display footer, plus whether it is an error
    pub fn banner(&self) -> (String, bool) {
        match self.error_code {
            0 => ("Idle".to_string(), false),
            Self::NO_LINK => ("No link".to_string(), true),
            Self::CLOCK_NOT_SYNCED => ("No time sync".to_string(), true),
            Self::TRANSPORT_ERROR => ("Send failed".to_string(), true),
            code if self.succeeded => (format!("Sent (HTTP {})", code), false),
            code if code > 0 => (format!("HTTP {}", code), true),
            code => (format!("Error {}", code), true),
        }
    }
}

/// latest station state for the status endpoint; republished on boot and
/// whenever a tick samples or uploads
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatus {
    /// unconfigured / booting / running
    pub phase: String,
    /// disconnected / connecting / connected
    pub link: String,
    pub air_sensor: String,
    pub light_sensor: String,
    pub readings: ReadingSet,
    pub last_upload: UploadOutcome,
    pub last_sent_minute: Option<u32>,
    pub retry_pending: bool,
    /// unix timestamp (ms) of the last publish
    pub updated_at: u64,
}
