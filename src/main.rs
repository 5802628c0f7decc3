//! ==============================================================================
//! main.rs - station node entry point
//! ==============================================================================
//!
//! purpose:
//!     a small weather station: reads whatever air / uv chips are on the i2c
//!     bus, shows them on a paged display and uploads them to an ingest api
//!     on wall-clock aligned slots, retrying on a fixed timer when that fails.
//!
//! responsibilities:
//!     - load the runtime config and set up logging
//!     - open the hardware (simulated bus unless built with `hardware`)
//!     - start the auxiliary tasks: console reader, settings watcher, status api
//!     - boot the device and run its tick loop forever
//!
//! relationships:
//!     - uses: device.rs (boot + tick), console.rs, settings.rs (watch)
//!     - serves: GET /api with the latest StationStatus snapshot
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     station node (this file)                 │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ stdin       │  │ settings    │  │ status api          │  │
//!     │  │ console     │  │ file watch  │  │ (port 3000)         │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────▲──────────┘  │
//!     │         │ commands       │ reload             │ snapshot    │
//!     │         └────────┬───────┘                    │             │
//!     │            ┌─────▼─────────────────────────────┴──┐          │
//!     │            │ device tick loop (100ms)             │          │
//!     │            │ link -> commands -> pager -> upload  │          │
//!     │            └──────────────────────────────────────┘          │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod config;
mod console;
mod controller;
mod device;
mod display;
mod domain;
mod gpio;
mod hal;
mod link;
mod sensor;
mod settings;
#[cfg(test)]
mod testing;
mod transport;
mod wifi;

use anyhow::{Context, Result};
use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{HostConfig, LinkMode};
use crate::device::Device;
use crate::display::{DisplayPager, LogScreen, Screen};
use crate::domain::StationStatus;
use crate::gpio::StatusLed;
use crate::link::{LinkManager, LinkPolicy};
use crate::sensor::chips::I2cChips;
use crate::sensor::SensorBackend;
use crate::settings::SettingsStore;
use crate::transport::HttpTransport;
use crate::wifi::{NmcliRadio, Radio, SystemRadio};

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: configuration, then logging (RUST_LOG wins over the file)
    let config = HostConfig::load_or_default();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("===========================================================");
    info!("  Station Node v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================================");
    config.print_summary();

    // step 2: persisted station settings + the command channel feeding the tick
    let settings = SettingsStore::open(&config.storage.settings_path);
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    console::spawn_reader(tx.clone());

    // step 3: hardware
    let hw = hal::open(config.sensors.i2c_bus)
        .with_context(|| format!("opening i2c bus {}", config.sensors.i2c_bus))?;
    let sensors = SensorBackend::unbound(Box::new(I2cChips::new(hw.clone())));

    let radio: Box<dyn Radio> = match config.link.mode {
        LinkMode::System => Box::new(SystemRadio),
        LinkMode::Nmcli => Box::new(NmcliRadio::new(config.link.interface.clone())),
    };
    let mut link = LinkManager::new(radio, LinkPolicy::default());
    if let Some(pin) = config.sensors.status_led_pin {
        link = link.with_led(StatusLed::new(hw.clone(), pin));
    }

    let screen: Option<Box<dyn Screen>> = if config.display.enabled {
        Some(Box::new(LogScreen::default()))
    } else {
        None
    };
    let transport = HttpTransport::new(
        config.upload.endpoint.clone(),
        Duration::from_secs(config.upload.timeout_seconds),
    )?;

    let mut device = Device::new(settings, link, sensors, DisplayPager::new(screen), transport, rx);
    let _watcher = match settings::watch(device.settings().path(), tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("[STARTUP] Settings watch unavailable: {:#}", e);
            None
        }
    };

    // step 4: status api in the background
    if config.server.enabled {
        let status = device.status();
        let bind = config.server.bind.clone();
        tokio::spawn(async move {
            info!("[STARTUP] Status api at http://{}/api", bind);
            if let Err(e) = run_server(status, &bind).await {
                error!("[ERROR] Status server error: {:#}", e);
            }
        });
    }

    // step 5: boot, then tick forever
    device.boot().await;
    info!("[STARTUP] Device {}", device.phase().label());
    let tick = Duration::from_millis(config.polling.tick_ms.max(1));
    info!("[RUNTIME] Tick loop started ({}ms)", tick.as_millis());

    loop {
        device.tick(Instant::now()).await;
        tokio::time::sleep(tick).await;
    }
}

// ==============================================================================
// status api
// ==============================================================================

fn router(status: Arc<RwLock<StationStatus>>) -> Router {
    Router::new()
        .route("/api", get(api_handler))
        .layer(CorsLayer::permissive())
        .with_state(status)
}

async fn run_server(status: Arc<RwLock<StationStatus>>, bind: &str) -> Result<()> {
    let app = router(status);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn api_handler(State(status): State<Arc<RwLock<StationStatus>>>) -> Json<StationStatus> {
    let status = status.read().await;
    Json(status.clone())
}
