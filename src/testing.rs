//! test doubles shared by the unit tests

use anyhow::{bail, Result};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::display::{Frame, Screen};
use crate::domain::UploadOutcome;
use crate::hal::HardwareProvider;
use crate::link::CLOCK_VALID_AFTER;
use crate::sensor::{Chip, ChipDriver, RawSample};
use crate::settings::SettingsStore;
use crate::transport::{Transport, UploadRequest};
use crate::wifi::Radio;

/// fresh settings file path in a per-test temp directory
pub fn scratch_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("station-node-{}-{}", std::process::id(), name));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("settings.toml")
}

/// settings store starting from defaults
pub fn scratch_settings(name: &str) -> SettingsStore {
    SettingsStore::open(scratch_path(name))
}

// ---- hal ----------------------------------------------------------------

#[derive(Default)]
pub struct FakeBus {
    gpio: Mutex<Vec<(u8, bool)>>,
}

impl FakeBus {
    pub fn gpio_writes(&self) -> Vec<(u8, bool)> {
        self.gpio.lock().unwrap().clone()
    }
}

impl HardwareProvider for FakeBus {
    fn i2c_transfer(&self, addr: u8, _write_data: &[u8], _read_len: u32) -> Result<Vec<u8>> {
        bail!("no ack from 0x{:02X}", addr)
    }

    fn write_gpio(&self, pin: u8, level: bool) -> Result<()> {
        self.gpio.lock().unwrap().push((pin, level));
        Ok(())
    }
}

// ---- radio --------------------------------------------------------------

#[derive(Debug)]
struct RadioState {
    associated: bool,
    epoch: u64,
    associations: Vec<String>,
    polls: u32,
    reconnects: u32,
}

/// scriptable radio; clones share state so tests can poke it after handing
/// one to a `LinkManager`
#[derive(Clone)]
pub struct FakeRadio {
    state: Arc<Mutex<RadioState>>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RadioState {
                associated: false,
                // an hour into 2024, minute 0
                epoch: CLOCK_VALID_AFTER + 3600,
                associations: vec![],
                polls: 0,
                reconnects: 0,
            })),
        }
    }

    pub fn set_associated(&self, up: bool) {
        self.state.lock().unwrap().associated = up;
    }

    pub fn set_epoch(&self, epoch: u64) {
        self.state.lock().unwrap().epoch = epoch;
    }

    pub fn associations(&self) -> Vec<String> {
        self.state.lock().unwrap().associations.clone()
    }

    pub fn polls(&self) -> u32 {
        self.state.lock().unwrap().polls
    }

    pub fn reconnects(&self) -> u32 {
        self.state.lock().unwrap().reconnects
    }
}

impl Radio for FakeRadio {
    fn associate(&mut self, ssid: &str, _secret: &str) -> bool {
        self.state.lock().unwrap().associations.push(ssid.to_string());
        true
    }

    fn is_associated(&mut self) -> bool {
        let mut s = self.state.lock().unwrap();
        s.polls += 1;
        s.associated
    }

    fn reconnect(&mut self) {
        self.state.lock().unwrap().reconnects += 1;
    }

    fn now_epoch(&self) -> u64 {
        self.state.lock().unwrap().epoch
    }

    fn ip_address(&self) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    }
}

// ---- chips --------------------------------------------------------------

/// chips present at fixed addresses with canned samples
pub struct FakeChips {
    present: HashMap<(Chip, u8), RawSample>,
    failing: Arc<AtomicBool>,
}

impl FakeChips {
    pub fn new() -> Self {
        Self {
            present: HashMap::new(),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with(mut self, chip: Chip, addr: u8, sample: RawSample) -> Self {
        self.present.insert((chip, addr), sample);
        self
    }

    /// while set, every read fails
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        self.failing.clone()
    }
}

impl ChipDriver for FakeChips {
    fn probe(&mut self, chip: Chip, addr: u8) -> bool {
        self.present.contains_key(&(chip, addr))
    }

    fn read(&mut self, chip: Chip, addr: u8) -> Result<RawSample> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("bus error");
        }
        match self.present.get(&(chip, addr)) {
            Some(sample) => Ok(*sample),
            None => bail!("no such chip"),
        }
    }
}

// ---- transport ----------------------------------------------------------

#[derive(Default)]
struct TransportLog {
    requests: Vec<UploadRequest>,
    script: VecDeque<UploadOutcome>,
}

/// records requests; answers from a script, then HTTP 200
#[derive(Clone, Default)]
pub struct RecordingTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl RecordingTransport {
    pub fn script(&self, outcome: UploadOutcome) {
        self.log.lock().unwrap().script.push_back(outcome);
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        self.log.lock().unwrap().requests.clone()
    }
}

impl Transport for RecordingTransport {
    async fn upload(&self, request: &UploadRequest) -> UploadOutcome {
        let mut log = self.log.lock().unwrap();
        log.requests.push(request.clone());
        log.script
            .pop_front()
            .unwrap_or_else(|| UploadOutcome::from_status(200))
    }
}

// ---- screen -------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingScreen {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl RecordingScreen {
    pub fn last(&self) -> Option<Frame> {
        self.frames.lock().unwrap().last().cloned()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }
}

impl Screen for RecordingScreen {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
}
