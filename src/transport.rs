//! ==============================================================================
//! transport.rs - ingest upload
//! ==============================================================================
//!
//! purpose:
//!     serializes one reading set and posts it to the ingest endpoint.
//!
//! wire format:
//!     {
//!       "stationId": "...", "timestamp": 1717246050,
//!       "location": { "lat": 52.52, "lon": 13.40 },
//!       "environment": { "temperature", "humidity", "pressure", "gasResistance" },
//!       "light": { "uvIndex", "uva", "uvb" },
//!       "wind": { "speed", "direction" },
//!       "rain": { "rate", "daily" }
//!     }
//!     absent fields are left out (never null or zero). a domain that is
//!     invalid or has nothing to report is left out entirely.
//!     the api key travels in the `x-api-key` header.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::{measured, ReadingSet, UploadOutcome, AIR_SENTINEL, AUX_SENTINEL};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub station_id: String,
    pub api_key: String,
    /// unix seconds
    pub timestamp: u64,
    pub lat: f64,
    pub lon: f64,
    pub readings: ReadingSet,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload<'a> {
    station_id: &'a str,
    timestamp: u64,
    location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<Environment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    light: Option<Light>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wind: Option<Wind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rain: Option<Rain>,
}

#[derive(Debug, Serialize)]
struct Location {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Environment {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pressure: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas_resistance: Option<f32>,
}

#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Light {
    #[serde(skip_serializing_if = "Option::is_none")]
    uv_index: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uva: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uvb: Option<f32>,
}

#[derive(Debug, Default, PartialEq, Serialize)]
struct Wind {
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    direction: Option<f32>,
}

#[derive(Debug, Default, PartialEq, Serialize)]
struct Rain {
    #[serde(skip_serializing_if = "Option::is_none")]
    rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    daily: Option<f32>,
}

/// None for an invalid domain or one where every field is absent
fn section<T: Default + PartialEq>(valid: bool, body: T) -> Option<T> {
    (valid && body != T::default()).then_some(body)
}

impl UploadRequest {
    pub fn payload(&self) -> Payload<'_> {
        let r = &self.readings;
        let air = |v: Option<f32>| v.and_then(|v| measured(v, AIR_SENTINEL));
        let aux = |v: Option<f32>| v.and_then(|v| measured(v, AUX_SENTINEL));

        Payload {
            station_id: &self.station_id,
            timestamp: self.timestamp,
            location: Location {
                lat: self.lat,
                lon: self.lon,
            },
            environment: section(
                r.air.valid,
                Environment {
                    temperature: air(r.air.temperature),
                    humidity: air(r.air.humidity),
                    pressure: air(r.air.pressure),
                    gas_resistance: air(r.air.gas_resistance),
                },
            ),
            light: section(
                r.light.valid,
                Light {
                    uv_index: aux(r.light.uv_index),
                    uva: aux(r.light.uva),
                    uvb: aux(r.light.uvb),
                },
            ),
            wind: section(
                r.wind.valid,
                Wind {
                    speed: aux(r.wind.speed),
                    direction: aux(r.wind.direction),
                },
            ),
            rain: section(
                r.rain.valid,
                Rain {
                    rate: aux(r.rain.rate),
                    daily: aux(r.rain.daily),
                },
            ),
        }
    }
}

/// where readings go; implementations fold every failure into the outcome
pub trait Transport {
    fn upload(&self, request: &UploadRequest) -> impl Future<Output = UploadOutcome>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl Transport for HttpTransport {
    async fn upload(&self, request: &UploadRequest) -> UploadOutcome {
        let payload = request.payload();
        if let Ok(body) = serde_json::to_string(&payload) {
            debug!("[UPLOAD] POST {} {}", self.endpoint, body);
        }

        let mut builder = self.client.post(&self.endpoint).json(&payload);
        if !request.api_key.is_empty() {
            builder = builder.header(API_KEY_HEADER, &request.api_key);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    info!("[UPLOAD] Delivered (HTTP {})", status.as_u16());
                } else {
                    let body = response.text().await.unwrap_or_default();
                    warn!("[UPLOAD] Rejected: {} {}", status, body.trim());
                }
                UploadOutcome::from_status(status.as_u16())
            }
            Err(e) => {
                warn!("[UPLOAD] Transport error: {}", e);
                UploadOutcome::transport_error()
            }
        }
    }
}
