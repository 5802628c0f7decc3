//! ==============================================================================
//! controller.rs - upload scheduling and retry
//! ==============================================================================
//!
//! purpose:
//!     decides, once per tick, whether to sample-and-upload, just refresh the
//!     display, or do nothing.
//!
//! decision (priority order):
//!     1. first tick since boot                 -> attempt
//!     2. failed attempt still cooling down     -> nothing (not even a slot)
//!     3. minute % interval == 0, not yet sent  -> attempt (slot)
//!     4. failed attempt, cooldown over         -> attempt (retry)
//!     5. otherwise                             -> refresh readings every 2s
//!
//!     slots are wall-clock aligned (:00, :15, :30 ...) so a late or failed
//!     upload never shifts the schedule.
//!
//! ==============================================================================

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::display::DisplayPager;
use crate::domain::{ReadingSet, UploadOutcome};
use crate::link::LinkManager;
use crate::sensor::SensorBackend;
use crate::settings::SettingsStore;
use crate::transport::{Transport, UploadRequest};

pub const RETRY_COOLDOWN: Duration = Duration::from_secs(60);
pub const REFRESH_PERIOD: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    FirstRun,
    /// scheduled slot at this minute of the hour
    Slot(u32),
    Retry,
    Refresh,
    Idle,
}

impl Decision {
    pub fn is_attempt(&self) -> bool {
        matches!(self, Decision::FirstRun | Decision::Slot(_) | Decision::Retry)
    }
}

/// where the wall clock stands, as seen by the scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WallMinute {
    /// 0..=59
    pub minute: u32,
    /// minutes since the unix epoch; tells one hour's :00 from the next
    pub epoch_minute: u64,
}

/// upload bookkeeping; lives only as long as one boot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleState {
    /// minute of the hour of the last attempt
    pub last_sent_minute: Option<u32>,
    /// the same attempt as an epoch minute; guards the slot across hours
    pub last_sent_slot: Option<u64>,
    pub first_run_pending: bool,
    pub retry_pending: bool,
    pub last_attempt: Option<Instant>,
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self {
            last_sent_minute: None,
            last_sent_slot: None,
            first_run_pending: true,
            retry_pending: false,
            last_attempt: None,
        }
    }
}

impl ScheduleState {
    /// which attempt (if any) is due; never returns `Refresh`
    pub fn decide(&self, now: Instant, clock: Option<WallMinute>, interval_minutes: u32) -> Decision {
        let interval = interval_minutes.max(1);

        if self.first_run_pending {
            return Decision::FirstRun;
        }
        if self.retry_pending && !self.cooldown_over(now) {
            return Decision::Idle;
        }
        if let Some(at) = clock {
            if at.minute % interval == 0 && self.last_sent_slot != Some(at.epoch_minute) {
                return Decision::Slot(at.minute);
            }
        }
        if self.retry_pending {
            return Decision::Retry;
        }
        Decision::Idle
    }

    fn cooldown_over(&self, now: Instant) -> bool {
        self.last_attempt
            .map_or(true, |at| now.saturating_duration_since(at) >= RETRY_COOLDOWN)
    }

    /// fold an attempt's outcome back in
    ///
    /// a failed attempt still claims its minute, so the same slot is not
    /// retried through the slot path; the retry timer covers it.
    pub fn record(&mut self, outcome: &UploadOutcome, now: Instant, clock: Option<WallMinute>) {
        self.first_run_pending = false;
        if let Some(at) = clock {
            self.last_sent_minute = Some(at.minute);
            self.last_sent_slot = Some(at.epoch_minute);
        }
        if outcome.succeeded {
            self.retry_pending = false;
        } else {
            self.retry_pending = true;
            self.last_attempt = Some(now);
        }
    }
}

/// everything a tick reads or updates besides the controller itself
pub struct TickEnv<'a> {
    pub settings: &'a SettingsStore,
    pub link: &'a LinkManager,
    pub sensors: &'a mut SensorBackend,
    pub pager: &'a mut DisplayPager,
}

pub struct StationController<T> {
    schedule: ScheduleState,
    transport: T,
    last_refresh: Option<Instant>,
    latest: ReadingSet,
    last_outcome: UploadOutcome,
}

impl<T: Transport> StationController<T> {
    pub fn new(transport: T) -> Self {
        Self {
            schedule: ScheduleState::default(),
            transport,
            last_refresh: None,
            latest: ReadingSet::default(),
            last_outcome: UploadOutcome::not_attempted(),
        }
    }

    /// start over as if freshly booted; the transport is kept
    pub fn reset(&mut self) {
        self.schedule = ScheduleState::default();
        self.last_refresh = None;
        self.latest = ReadingSet::default();
        self.last_outcome = UploadOutcome::not_attempted();
    }

    pub fn schedule(&self) -> &ScheduleState {
        &self.schedule
    }

    pub fn latest(&self) -> &ReadingSet {
        &self.latest
    }

    pub fn last_outcome(&self) -> UploadOutcome {
        self.last_outcome
    }

    pub async fn tick(&mut self, env: TickEnv<'_>, now: Instant) -> Decision {
        let interval = env.settings.interval_minutes();
        let clock = env
            .link
            .current_epoch()
            .zip(env.link.current_minute())
            .map(|(epoch, minute)| WallMinute { minute, epoch_minute: epoch / 60 });

        let decision = match self.schedule.decide(now, clock, interval) {
            Decision::Idle if self.refresh_due(now) => Decision::Refresh,
            d => d,
        };

        match decision {
            Decision::Idle => {}
            Decision::Refresh => {
                self.sample(env.sensors, env.pager, now);
            }
            attempt if attempt.is_attempt() => {
                info!("[STATION] Upload attempt: {:?}", attempt);
                self.attempt(env, now, clock).await;
            }
            _ => {}
        }
        decision
    }

    fn refresh_due(&self, now: Instant) -> bool {
        self.last_refresh
            .map_or(true, |at| now.saturating_duration_since(at) >= REFRESH_PERIOD)
    }

    /// read both domains and push them to the pager
    fn sample(&mut self, sensors: &mut SensorBackend, pager: &mut DisplayPager, now: Instant) -> ReadingSet {
        let (air, light) = sensors.sample();
        let readings = ReadingSet::sampled(air, light);

        pager.set_air_data(readings.air);
        pager.set_light_data(readings.light);
        pager.set_wind_data(readings.wind);
        pager.set_rain_data(readings.rain);

        self.latest = readings;
        self.last_refresh = Some(now);
        readings
    }

    async fn attempt(&mut self, env: TickEnv<'_>, now: Instant, clock: Option<WallMinute>) {
        let readings = self.sample(env.sensors, env.pager, now);

        let outcome = if !env.link.is_connected() {
            UploadOutcome::no_link()
        } else if let Some(timestamp) = env.link.current_epoch() {
            let config = env.settings.config();
            let request = UploadRequest {
                station_id: config.station_id.clone(),
                api_key: config.api_key.clone(),
                timestamp,
                lat: config.lat,
                lon: config.lon,
                readings,
            };
            self.transport.upload(&request).await
        } else {
            UploadOutcome::clock_not_synced()
        };

        self.schedule.record(&outcome, now, clock);
        let (banner, is_error) = outcome.banner();
        if outcome.succeeded {
            info!("[STATION] {}", banner);
        } else {
            info!("[STATION] {} - retry in {}s", banner, RETRY_COOLDOWN.as_secs());
        }
        debug!("[STATION] schedule now {:?}", self.schedule);
        env.pager.set_status(&banner, is_error);
        self.last_outcome = outcome;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkPolicy, CLOCK_VALID_AFTER};
    use crate::sensor::{Chip, RawSample};
    use crate::settings::SettingKey;
    use crate::testing::{scratch_settings, FakeChips, FakeRadio, RecordingScreen, RecordingTransport};

    const SECOND: Duration = Duration::from_secs(1);

    /// minute of the hour `m` in the first hour after the epoch
    fn at(m: u64) -> Option<WallMinute> {
        Some(WallMinute { minute: (m % 60) as u32, epoch_minute: m })
    }

    fn sent(minute: u64) -> ScheduleState {
        ScheduleState {
            last_sent_minute: Some((minute % 60) as u32),
            last_sent_slot: Some(minute),
            first_run_pending: false,
            retry_pending: false,
            last_attempt: None,
        }
    }

    // ---- pure scheduling -------------------------------------------------

    #[test]
    fn first_tick_always_attempts() {
        let s = ScheduleState::default();
        assert_eq!(s.decide(Instant::now(), at(13), 30), Decision::FirstRun);
        assert_eq!(s.decide(Instant::now(), None, 30), Decision::FirstRun);
    }

    #[test]
    fn success_claims_the_slot_for_any_interval() {
        let t0 = Instant::now();
        for interval in [1u32, 2, 5, 10, 15, 30, 60] {
            let mut s = sent(59);
            assert_eq!(s.decide(t0, at(60), interval), Decision::Slot(0), "interval {}", interval);
            s.record(&UploadOutcome::from_status(200), t0, at(60));
            assert_eq!(s.last_sent_minute, Some(0));
            assert_eq!(s.decide(t0 + SECOND, at(60), interval), Decision::Idle);
        }
    }

    #[test]
    fn non_slot_minutes_are_idle() {
        let s = sent(0);
        assert_eq!(s.decide(Instant::now(), at(7), 15), Decision::Idle);
        assert_eq!(s.decide(Instant::now(), None, 15), Decision::Idle);
    }

    #[test]
    fn failure_blocks_everything_until_cooldown_then_exactly_one() {
        let t0 = Instant::now();
        let mut s = sent(0);
        s.record(&UploadOutcome::from_status(500), t0, at(15));
        assert!(s.retry_pending);

        // a fresh slot minute inside the cooldown still waits
        for secs in [1, 30, 59] {
            assert_eq!(s.decide(t0 + SECOND * secs, at(30), 15), Decision::Idle);
        }

        let later = t0 + RETRY_COOLDOWN;
        let d = s.decide(later, at(30), 15);
        assert_eq!(d, Decision::Slot(30));
        s.record(&UploadOutcome::from_status(201), later, at(30));
        assert_eq!(s.decide(later + SECOND, at(30), 15), Decision::Idle);
    }

    #[test]
    fn failed_slot_retries_on_timer_regardless_of_minute() {
        // interval 15, http 500 at :15
        let t0 = Instant::now();
        let mut s = sent(0);
        assert_eq!(s.decide(t0, at(15), 15), Decision::Slot(15));
        s.record(&UploadOutcome::from_status(500), t0, at(15));
        assert_eq!(s.last_sent_minute, Some(15));

        assert_eq!(s.decide(t0 + SECOND * 30, at(16), 15), Decision::Idle);
        assert_eq!(s.decide(t0 + RETRY_COOLDOWN, at(16), 15), Decision::Retry);

        // a failed retry re-arms the timer
        let t1 = t0 + RETRY_COOLDOWN;
        s.record(&UploadOutcome::transport_error(), t1, at(16));
        assert_eq!(s.decide(t1 + SECOND * 10, at(17), 15), Decision::Idle);
        assert_eq!(s.decide(t1 + RETRY_COOLDOWN, at(17), 15), Decision::Retry);
    }

    #[test]
    fn failure_without_clock_keeps_last_minute() {
        let mut s = sent(45);
        s.record(&UploadOutcome::clock_not_synced(), Instant::now(), None);
        assert_eq!(s.last_sent_minute, Some(45));
        assert_eq!(s.last_sent_slot, Some(45));
        assert!(s.retry_pending);
    }

    #[test]
    fn hourly_interval_sends_at_every_top_of_hour() {
        let t0 = Instant::now();
        let mut s = sent(0);
        for hour in 1..=3u64 {
            let top = at(hour * 60);
            let now = t0 + Duration::from_secs(hour * 3600);
            assert_eq!(s.decide(now, top, 60), Decision::Slot(0), "hour {}", hour);
            s.record(&UploadOutcome::from_status(201), now, top);
            assert_eq!(s.last_sent_minute, Some(0));
            assert_eq!(s.decide(now + SECOND * 30, top, 60), Decision::Idle);
            assert_eq!(s.decide(now + SECOND * 60, at(hour * 60 + 1), 60), Decision::Idle);
        }
    }

    #[test]
    fn zero_interval_behaves_as_one() {
        assert_eq!(sent(3).decide(Instant::now(), at(4), 0), Decision::Slot(4));
    }

    // ---- full tick -------------------------------------------------------

    struct Rig {
        radio: FakeRadio,
        transport: RecordingTransport,
        screen: RecordingScreen,
        settings: SettingsStore,
        link: LinkManager,
        sensors: SensorBackend,
        pager: DisplayPager,
        controller: StationController<RecordingTransport>,
    }

    impl Rig {
        async fn new(name: &str, connected: bool, interval: u32) -> Self {
            let radio = FakeRadio::new();
            radio.set_associated(connected);
            let policy = LinkPolicy {
                boot_attempts: 1,
                boot_poll: Duration::from_millis(1),
                ..LinkPolicy::default()
            };
            let mut link = LinkManager::new(Box::new(radio.clone()), policy);
            link.start("field-ap", "pw").await;

            let mut settings = scratch_settings(name);
            settings.set(SettingKey::IntervalMinutes, &interval.to_string()).unwrap();
            settings.set(SettingKey::StationId, "st-9").unwrap();

            let chips = FakeChips::new().with(Chip::Sht3x, 0x44, RawSample {
                temperature_c: Some(19.5),
                humidity_pct: Some(55.0),
                ..Default::default()
            });
            let screen = RecordingScreen::default();
            let transport = RecordingTransport::default();

            Self {
                radio,
                transport: transport.clone(),
                screen: screen.clone(),
                settings,
                link,
                sensors: SensorBackend::detect(Box::new(chips)),
                pager: DisplayPager::new(Some(Box::new(screen))),
                controller: StationController::new(transport),
            }
        }

        fn at_minute(&self, minute: u64) {
            self.radio.set_epoch(CLOCK_VALID_AFTER + 3600 + minute * 60);
        }

        async fn tick(&mut self, now: Instant) -> Decision {
            let env = TickEnv {
                settings: &self.settings,
                link: &self.link,
                sensors: &mut self.sensors,
                pager: &mut self.pager,
            };
            self.controller.tick(env, now).await
        }
    }

    #[tokio::test]
    async fn disconnected_first_run_fails_without_transport() {
        let mut rig = Rig::new("ctl-nolink", false, 30).await;
        rig.at_minute(10);
        let t0 = Instant::now();

        assert_eq!(rig.tick(t0).await, Decision::FirstRun);
        let s = rig.controller.schedule();
        assert!(s.retry_pending);
        assert!(!s.first_run_pending);
        assert_eq!(rig.controller.last_outcome().error_code, UploadOutcome::NO_LINK);
        assert!(rig.transport.requests().is_empty());

        // readings still reached the pager
        rig.pager.render(t0);
        assert!(rig.controller.latest().air.valid);
        assert!(rig.pager.frame().footer.ends_with("!No link"));
        assert!(rig.screen.last().is_some());
    }

    #[tokio::test]
    async fn boot_at_47_then_top_of_hour() {
        let mut rig = Rig::new("ctl-47", true, 30).await;
        rig.at_minute(47);
        let t0 = Instant::now();

        assert_eq!(rig.tick(t0).await, Decision::FirstRun);
        assert_eq!(rig.controller.schedule().last_sent_minute, Some(47));
        assert!(rig.controller.last_outcome().succeeded);

        let req = &rig.transport.requests()[0];
        assert_eq!(req.station_id, "st-9");
        assert_eq!(req.readings.air.temperature, Some(19.5));

        rig.at_minute(48);
        assert_eq!(rig.tick(t0 + SECOND * 60).await, Decision::Refresh);

        rig.at_minute(60);
        assert_eq!(rig.tick(t0 + SECOND * 780).await, Decision::Slot(0));
        assert_eq!(rig.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn hourly_interval_keeps_uploading_across_hours() {
        let mut rig = Rig::new("ctl-hourly", true, 60).await;
        rig.at_minute(30);
        let t0 = Instant::now();
        assert_eq!(rig.tick(t0).await, Decision::FirstRun);

        rig.at_minute(60);
        assert_eq!(rig.tick(t0 + SECOND * 1800).await, Decision::Slot(0));
        rig.at_minute(120);
        assert_eq!(rig.tick(t0 + SECOND * 5400).await, Decision::Slot(0));
        assert_eq!(rig.transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn server_error_sets_banner_and_retries_after_cooldown() {
        let mut rig = Rig::new("ctl-500", true, 15).await;
        rig.transport.script(UploadOutcome::from_status(500));
        rig.at_minute(15);
        let t0 = Instant::now();

        rig.tick(t0).await;
        assert!(rig.pager.frame().footer.ends_with("!HTTP 500"));
        rig.at_minute(16);
        assert!(!rig.tick(t0 + SECOND * 30).await.is_attempt());
        assert_eq!(rig.tick(t0 + RETRY_COOLDOWN).await, Decision::Retry);
        assert_eq!(rig.transport.requests().len(), 2);
        assert!(!rig.controller.schedule().retry_pending);
    }

    #[tokio::test]
    async fn refresh_runs_every_two_seconds() {
        let mut rig = Rig::new("ctl-refresh", true, 30).await;
        rig.at_minute(5);
        let t0 = Instant::now();
        rig.tick(t0).await;

        assert_eq!(rig.tick(t0 + Duration::from_millis(100)).await, Decision::Idle);
        assert_eq!(rig.tick(t0 + Duration::from_millis(1_900)).await, Decision::Idle);
        assert_eq!(rig.tick(t0 + SECOND * 2).await, Decision::Refresh);
        assert_eq!(rig.tick(t0 + Duration::from_millis(2_100)).await, Decision::Idle);
    }

    #[tokio::test]
    async fn unsynced_clock_is_a_distinct_failure() {
        let mut rig = Rig::new("ctl-clock", true, 30).await;
        rig.radio.set_epoch(1_000);

        rig.tick(Instant::now()).await;
        assert_eq!(
            rig.controller.last_outcome().error_code,
            UploadOutcome::CLOCK_NOT_SYNCED
        );
        assert!(rig.transport.requests().is_empty());
        assert_eq!(rig.controller.schedule().last_sent_minute, None);
    }
}
