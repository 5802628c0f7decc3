//! ==============================================================================
//! device.rs - boot sequence and the per-tick pipeline
//! ==============================================================================
//!
//! purpose:
//!     owns every piece of station state and is the only thing that mutates
//!     it. the main loop calls `tick` every `polling.tick_ms`.
//!
//! phases:
//!     Unconfigured  ssid is still the placeholder; only console commands run
//!     Booting       associating with the network, probing sensors
//!     Running       link upkeep, pager, upload scheduling
//!
//!     `restart` (console) re-runs boot from scratch: fresh schedule, new
//!     association, sensors probed again.
//!
//! one tick (running):
//!     link.update -> drain commands -> pager.render -> controller.tick
//!     -> publish status snapshot
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::console::{self, Command};
use crate::controller::{Decision, StationController, TickEnv};
use crate::display::DisplayPager;
use crate::domain::StationStatus;
use crate::link::LinkManager;
use crate::sensor::SensorBackend;
use crate::settings::{SettingKey, SettingsStore};
use crate::transport::Transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DevicePhase {
    Unconfigured,
    Booting,
    Running,
}

impl DevicePhase {
    pub fn label(&self) -> &'static str {
        match self {
            DevicePhase::Unconfigured => "unconfigured",
            DevicePhase::Booting => "booting",
            DevicePhase::Running => "running",
        }
    }
}

pub struct Device<T> {
    phase: DevicePhase,
    settings: SettingsStore,
    link: LinkManager,
    sensors: SensorBackend,
    pager: DisplayPager,
    controller: StationController<T>,
    commands: UnboundedReceiver<Command>,
    status: Arc<RwLock<StationStatus>>,
}

impl<T: Transport> Device<T> {
    /// nothing runs until `boot`
    pub fn new(
        settings: SettingsStore,
        link: LinkManager,
        sensors: SensorBackend,
        pager: DisplayPager,
        transport: T,
        commands: UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            phase: DevicePhase::Booting,
            settings,
            link,
            sensors,
            pager,
            controller: StationController::new(transport),
            commands,
            status: Arc::new(RwLock::new(StationStatus::default())),
        }
    }

    pub fn phase(&self) -> DevicePhase {
        self.phase
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    #[cfg(test)]
    pub fn controller(&self) -> &StationController<T> {
        &self.controller
    }

    /// shared snapshot for the status endpoint
    pub fn status(&self) -> Arc<RwLock<StationStatus>> {
        self.status.clone()
    }

    pub async fn boot(&mut self) {
        self.controller.reset();

        if !self.settings.is_configured() {
            self.phase = DevicePhase::Unconfigured;
            warn!("[BOOT] No network configured - waiting for console setup");
            info!("[BOOT] Type 'help' for commands, then 'restart'");
            self.pager
                .show_message("Setup required\nssid=<name>\npass=<secret>\nthen: restart");
            self.publish().await;
            return;
        }

        self.phase = DevicePhase::Booting;
        let ssid = self.settings.config().ssid.clone();
        let secret = self.settings.config().secret.clone();
        info!("[BOOT] Station '{}'", self.settings.config().station_id);

        self.pager.show_message(&format!("Connecting to\n{}...", ssid));
        self.publish().await;
        if self.link.start(&ssid, &secret).await {
            info!("[BOOT] Link up");
        } else {
            warn!("[BOOT] Link down - continuing, will keep retrying");
        }

        self.sensors.redetect();
        self.phase = DevicePhase::Running;
        info!("[BOOT] Running (upload every {} min)", self.settings.interval_minutes());
        self.publish().await;
    }

    /// one pass of the control loop; returns the controller's decision when
    /// the device is running
    pub async fn tick(&mut self, now: Instant) -> Option<Decision> {
        let running = self.phase == DevicePhase::Running;
        if running {
            self.link.update(now);
        }

        if self.drain_commands() {
            info!("[BOOT] Restart requested");
            self.boot().await;
            return None;
        }
        if self.phase != DevicePhase::Running {
            return None;
        }

        let ip = self.link.ip_address().map(|ip| ip.to_string()).unwrap_or_default();
        self.pager.set_network_info(
            self.link.ssid(),
            &ip,
            self.link.status_label(),
            self.link.is_connected(),
        );
        self.pager.render(now);

        let env = TickEnv {
            settings: &self.settings,
            link: &self.link,
            sensors: &mut self.sensors,
            pager: &mut self.pager,
        };
        let decision = self.controller.tick(env, now).await;
        if decision != Decision::Idle {
            self.publish().await;
        }
        Some(decision)
    }

    /// apply everything queued since the last tick; true if a restart was asked
    fn drain_commands(&mut self) -> bool {
        let mut restart = false;
        while let Ok(command) = self.commands.try_recv() {
            debug!("[CONSOLE] {:?}", redacted(&command));
            match command {
                Command::Set(key, value) => match self.settings.set(key, &value) {
                    Ok(()) => {
                        if matches!(key, SettingKey::Ssid | SettingKey::Secret) {
                            info!("[CONSOLE] {} saved - restart to apply", key);
                        }
                    }
                    Err(e) => warn!("[CONSOLE] {} not applied: {:#}", key, e),
                },
                Command::Restart => restart = true,
                Command::Info => {
                    for line in console::info_lines(&self.settings) {
                        info!("[CONSOLE] {}", line);
                    }
                }
                Command::Help => {
                    for line in console::help_lines() {
                        info!("[CONSOLE] {}", line);
                    }
                }
                Command::Reload => {
                    if let Err(e) = self.settings.reload() {
                        warn!("[SETTINGS] reload failed: {:#}", e);
                    }
                }
            }
        }
        restart
    }

    async fn publish(&self) {
        let capability = self.sensors.capability();
        let schedule = self.controller.schedule();
        let snapshot = StationStatus {
            phase: self.phase.label().to_string(),
            link: self.link.status_label().to_string(),
            air_sensor: capability.air.to_string(),
            light_sensor: capability.light.to_string(),
            readings: *self.controller.latest(),
            last_upload: self.controller.last_outcome(),
            last_sent_minute: schedule.last_sent_minute,
            retry_pending: schedule.retry_pending,
            updated_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        };
        *self.status.write().await = snapshot;
    }
}

/// command as it may appear in logs
fn redacted(command: &Command) -> Command {
    match command {
        Command::Set(key, _) if key.is_secret() => Command::Set(*key, "***".to_string()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UploadOutcome;
    use crate::link::LinkPolicy;
    use crate::sensor::{Chip, RawSample};
    use crate::testing::{scratch_settings, FakeChips, FakeRadio, RecordingScreen, RecordingTransport};
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

    struct Rig {
        radio: FakeRadio,
        transport: RecordingTransport,
        screen: RecordingScreen,
        tx: UnboundedSender<Command>,
        device: Device<RecordingTransport>,
    }

    fn rig(settings: SettingsStore) -> Rig {
        let radio = FakeRadio::new();
        radio.set_associated(true);
        let policy = LinkPolicy {
            boot_attempts: 1,
            boot_poll: Duration::from_millis(1),
            ..LinkPolicy::default()
        };
        let link = LinkManager::new(Box::new(radio.clone()), policy);
        let chips = FakeChips::new().with(Chip::Sht3x, 0x44, RawSample {
            temperature_c: Some(18.0),
            humidity_pct: Some(60.0),
            ..Default::default()
        });
        let screen = RecordingScreen::default();
        let transport = RecordingTransport::default();
        let (tx, rx) = unbounded_channel();
        let device = Device::new(
            settings,
            link,
            SensorBackend::unbound(Box::new(chips)),
            DisplayPager::new(Some(Box::new(screen.clone()))),
            transport.clone(),
            rx,
        );
        Rig {
            radio,
            transport,
            screen,
            tx,
            device,
        }
    }

    fn configured(name: &str) -> SettingsStore {
        let mut settings = scratch_settings(name);
        settings.set(SettingKey::Ssid, "field-ap").unwrap();
        settings.set(SettingKey::StationId, "st-1").unwrap();
        settings
    }

    #[tokio::test]
    async fn unconfigured_device_only_takes_commands() {
        let mut rig = rig(scratch_settings("dev-unconf"));
        rig.device.boot().await;
        assert_eq!(rig.device.phase(), DevicePhase::Unconfigured);

        let t0 = Instant::now();
        for i in 0..50u64 {
            assert_eq!(rig.device.tick(t0 + Duration::from_millis(100 * i)).await, None);
        }
        assert!(rig.radio.associations().is_empty());
        assert!(rig.transport.requests().is_empty());
        let splash = rig.screen.last().unwrap();
        assert_eq!(splash.lines[0], "Setup required");

        // commands still apply
        rig.tx.send(Command::Set(SettingKey::IntervalMinutes, "0".into())).unwrap();
        rig.device.tick(t0).await;
        assert_eq!(rig.device.settings().interval_minutes(), 1);
        assert_eq!(rig.device.status().read().await.phase, "unconfigured");
    }

    #[tokio::test]
    async fn console_setup_then_restart_boots() {
        let mut rig = rig(scratch_settings("dev-setup"));
        rig.device.boot().await;

        rig.tx.send(Command::Set(SettingKey::Ssid, "field-ap".into())).unwrap();
        rig.tx.send(Command::Set(SettingKey::Secret, "pw".into())).unwrap();
        rig.tx.send(Command::Restart).unwrap();
        rig.device.tick(Instant::now()).await;

        assert_eq!(rig.device.phase(), DevicePhase::Running);
        assert_eq!(rig.radio.associations(), vec!["field-ap".to_string()]);
        assert!(rig
            .screen
            .frames()
            .iter()
            .any(|f| f.lines.first().map(String::as_str) == Some("Connecting to")));
    }

    #[tokio::test]
    async fn running_device_uploads_and_publishes() {
        let mut rig = rig(configured("dev-run"));
        rig.device.boot().await;
        assert_eq!(rig.device.phase(), DevicePhase::Running);

        let t0 = Instant::now();
        assert_eq!(rig.device.tick(t0).await, Some(Decision::FirstRun));
        assert_eq!(rig.transport.requests().len(), 1);
        assert_eq!(rig.transport.requests()[0].station_id, "st-1");

        let status = rig.device.status();
        let snapshot = status.read().await.clone();
        assert_eq!(snapshot.phase, "running");
        assert_eq!(snapshot.link, "Connected");
        assert_eq!(snapshot.air_sensor, "Sht3x");
        assert!(snapshot.last_upload.succeeded);
        assert_eq!(snapshot.readings.air.temperature, Some(18.0));

        // the pager is drawing pages again after the boot splash
        assert_eq!(rig.screen.last().unwrap().title, "NETWORK");
    }

    #[tokio::test]
    async fn restart_starts_a_fresh_schedule() {
        let mut rig = rig(configured("dev-restart"));
        rig.transport.script(UploadOutcome::from_status(503));
        rig.device.boot().await;

        let t0 = Instant::now();
        rig.device.tick(t0).await;
        assert!(rig.device.controller().schedule().retry_pending);

        rig.tx.send(Command::Restart).unwrap();
        rig.device.tick(t0 + Duration::from_secs(1)).await;
        assert!(rig.device.controller().schedule().first_run_pending);
        assert_eq!(rig.radio.associations().len(), 2);

        assert_eq!(rig.device.tick(t0 + Duration::from_secs(2)).await, Some(Decision::FirstRun));
        assert_eq!(rig.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn reload_picks_up_outside_edits() {
        let mut rig = rig(configured("dev-reload"));
        let path = rig.device.settings().path().to_path_buf();

        let mut other = SettingsStore::open(&path);
        other.set(SettingKey::IntervalMinutes, "5").unwrap();

        rig.tx.send(Command::Reload).unwrap();
        rig.device.tick(Instant::now()).await;
        assert_eq!(rig.device.settings().interval_minutes(), 5);
    }

    #[test]
    fn secrets_are_redacted_for_logs() {
        let cmd = Command::Set(SettingKey::Secret, "hunter2".into());
        assert_eq!(redacted(&cmd), Command::Set(SettingKey::Secret, "***".into()));
        let cmd = Command::Set(SettingKey::Ssid, "ap".into());
        assert_eq!(redacted(&cmd), cmd);
    }
}
