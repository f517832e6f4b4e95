//! The monitoring engine - serialized sample processing

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::appliances::{
    bootstrap_profile, reinforce_profile, ApplianceProfile, ApplianceState, OnOff, StateTracker,
};
use crate::config::Config;
use crate::db::{EventSink, ProfileRepository};
use crate::detection::{ApplianceMatcher, EventDetector, EventKind, MatchResult, PowerEvent};
use crate::meter::Sample;

use super::{EventBus, MonitorError, SystemState};

/// Confidence attached to user-supplied labels.
const LABEL_CONFIDENCE: f64 = 0.9;

/// A persisted detection, id included.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedEvent {
    pub id: i64,
    pub event: PowerEvent,
}

/// What one ingested sample produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub event: Option<DetectedEvent>,
    pub matched: Option<MatchResult>,
}

/// Live pipeline status for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentStatus {
    pub current_power: f64,
    pub history_len: usize,
    pub window: crate::analysis::StatisticalSummary,
    pub active_appliances: Vec<ApplianceState>,
}

/// The monitoring engine.
///
/// Owns the detection pipeline behind a single mutex so that append,
/// detection, matching and state update for one sample complete before the
/// next sample begins. Persistence and notification collaborators are
/// injected; the engine applies its in-memory updates whether or not
/// persistence succeeds.
pub struct Monitor {
    config: Arc<Config>,
    detector: Mutex<EventDetector>,
    matcher: ApplianceMatcher,
    tracker: StateTracker,
    profiles: Arc<dyn ProfileRepository>,
    sink: Arc<dyn EventSink>,
    bus: Arc<EventBus>,

    started_at: Instant,
    total_readings: AtomicU64,
    total_events: AtomicU64,
    identified_events: AtomicU64,
    last_event: parking_lot::Mutex<Option<DateTime<Utc>>>,
    system: parking_lot::Mutex<sysinfo::System>,
}

impl Monitor {
    pub fn new(
        config: Arc<Config>,
        profiles: Arc<dyn ProfileRepository>,
        sink: Arc<dyn EventSink>,
        bus: Arc<EventBus>,
    ) -> Self {
        let detector = EventDetector::new(config.detection.clone());
        let matcher = ApplianceMatcher::new(&config.detection);

        Self {
            config,
            detector: Mutex::new(detector),
            matcher,
            tracker: StateTracker::new(),
            profiles,
            sink,
            bus,
            started_at: Instant::now(),
            total_readings: AtomicU64::new(0),
            total_events: AtomicU64::new(0),
            identified_events: AtomicU64::new(0),
            last_event: parking_lot::Mutex::new(None),
            system: parking_lot::Mutex::new(sysinfo::System::new()),
        }
    }

    /// Single entry point for incoming readings.
    ///
    /// The pipeline lock is held for the full sequence so two concurrent
    /// ingests can neither interleave their windows nor double-fire an
    /// event inside the debounce interval.
    pub async fn ingest_sample(&self, sample: Sample) -> Result<IngestOutcome> {
        if !sample.is_valid() {
            return Err(MonitorError::InvalidSample.into());
        }

        let mut detector = self.detector.lock().await;

        let flags = detector.signal_flags();
        let event = detector.observe(&sample);
        self.total_readings.fetch_add(1, Ordering::Relaxed);

        self.sink
            .record_sample(&sample, flags)
            .context("failed to persist raw reading")?;

        let mut outcome = IngestOutcome { event: None, matched: None };

        if let Some(mut event) = event {
            self.total_events.fetch_add(1, Ordering::Relaxed);
            *self.last_event.lock() = Some(event.detected_at);

            info!(
                "Power event detected: {:+.1}W change, confidence {:.2}",
                event.power_change, event.confidence
            );

            let event_id = self
                .sink
                .record_event(&event)
                .context("failed to persist event")?;

            let catalogue = self.profiles.list().context("failed to load appliance catalogue")?;
            let matched = self.matcher.best_match(&event, &catalogue, &self.tracker);

            if let Some(result) = &matched {
                event.identified = true;
                self.identified_events.fetch_add(1, Ordering::Relaxed);
                self.apply_match(event_id, &event, result, &catalogue)?;
            } else {
                info!("Unidentified power event: {:+.1}W", event.power_change);
            }

            self.bus.publish_event(event_id, event.clone(), matched.clone());
            outcome.event = Some(DetectedEvent { id: event_id, event });
            outcome.matched = matched;
        }

        drop(detector);

        self.bus.publish_sample(sample);
        Ok(outcome)
    }

    /// Commits an accepted match: state tracker first, then learning and
    /// persistence, then notifications.
    fn apply_match(
        &self,
        event_id: i64,
        event: &PowerEvent,
        result: &MatchResult,
        catalogue: &[ApplianceProfile],
    ) -> Result<()> {
        let state = match event.kind {
            EventKind::On => OnOff::On,
            EventKind::Off => OnOff::Off,
        };

        let record = self.tracker.set(
            &result.appliance_name,
            state,
            result.power_consumption,
            result.confidence,
        );

        info!(
            "Appliance identified: {} ({}) - {:.1}W, confidence {:.2}",
            result.appliance_name, state, result.power_consumption, result.confidence
        );

        if let Some(profile) = catalogue.iter().find(|p| p.name == result.appliance_name) {
            let mut profile = profile.clone();
            reinforce_profile(&mut profile, result.power_consumption);
            self.profiles
                .upsert(&profile)
                .context("failed to persist learned profile")?;
        }

        self.sink
            .record_prediction(event_id, &result.appliance_name, result.power_consumption, state, result.confidence)
            .context("failed to persist prediction")?;
        self.sink.mark_identified(event_id).context("failed to mark event identified")?;
        self.sink.upsert_state(&record).context("failed to persist appliance state")?;

        self.bus.publish_appliance_update(record);
        self.bus.publish_appliance_list(self.tracker.snapshot());

        Ok(())
    }

    /// User-driven correction. Mirrors an automatic match: the profile
    /// learns, the tracker and persisted state flip, and the event is
    /// marked identified.
    pub async fn label_event(
        &self,
        event_id: i64,
        appliance_name: &str,
        power_change: Option<f64>,
    ) -> Result<()> {
        if !self.sink.mark_identified(event_id).context("failed to mark event identified")? {
            return Err(MonitorError::UnknownEvent(event_id).into());
        }

        self.sink
            .record_feedback(Some(event_id), None, appliance_name, power_change)
            .context("failed to persist feedback")?;

        if let Some(change) = power_change {
            match self.profiles.get(appliance_name).context("failed to load profile")? {
                Some(mut profile) => {
                    reinforce_profile(&mut profile, change);
                    self.profiles.upsert(&profile).context("failed to persist learned profile")?;
                    info!("Updated appliance '{}' with {:.1}W observation", appliance_name, change.abs());
                }
                None => {
                    let profile = bootstrap_profile(appliance_name, change);
                    self.profiles.upsert(&profile).context("failed to persist new profile")?;
                    info!("Created appliance '{}' at {:.1}W", appliance_name, change.abs());
                }
            }
        }

        let state = match power_change {
            Some(change) if change > 0.0 => OnOff::On,
            _ => OnOff::Off,
        };
        let power = power_change.map(f64::abs).unwrap_or(0.0);

        let record = self.tracker.set(appliance_name, state, power, LABEL_CONFIDENCE);
        self.sink
            .record_prediction(event_id, appliance_name, power, state, LABEL_CONFIDENCE)
            .context("failed to persist prediction")?;
        self.sink.upsert_state(&record).context("failed to persist appliance state")?;

        self.identified_events.fetch_add(1, Ordering::Relaxed);
        self.bus.publish_labeled(event_id, appliance_name, power_change);
        self.bus.publish_appliance_update(record);
        self.bus.publish_appliance_list(self.tracker.snapshot());

        Ok(())
    }

    /// Adds a catalogue entry without any observation behind it.
    pub async fn add_appliance(&self, name: &str, typical_power: f64, duration_secs: i64) -> Result<()> {
        if self.profiles.get(name).context("failed to load profile")?.is_some() {
            bail!("appliance '{}' already exists", name);
        }

        let profile = ApplianceProfile::with_typical_power(name, typical_power, duration_secs);
        self.profiles.upsert(&profile).context("failed to persist new profile")?;
        info!("Added appliance: {} ({:.0}W)", name, typical_power);
        Ok(())
    }

    /// Administrative removal of an appliance and everything about it.
    pub async fn delete_appliance(&self, name: &str) -> Result<()> {
        self.sink.delete_appliance_data(name).context("failed to delete appliance data")?;
        self.tracker.remove(name);
        info!("Deleted appliance: {}", name);
        Ok(())
    }

    /// Clears all measurement data and in-memory pipeline state. The seeded
    /// catalogue survives with learning counts reset.
    pub async fn reset(&self) -> Result<()> {
        let mut detector = self.detector.lock().await;

        self.sink.reset_data().context("failed to reset stored data")?;
        detector.reset();
        self.tracker.clear();
        self.total_readings.store(0, Ordering::Relaxed);
        self.total_events.store(0, Ordering::Relaxed);
        self.identified_events.store(0, Ordering::Relaxed);
        *self.last_event.lock() = None;

        warn!("System reset performed - all measurement data cleared");
        Ok(())
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn current_status(&self) -> CurrentStatus {
        let detector = self.detector.lock().await;
        let powers = detector.recent_powers(detector.history_len());

        CurrentStatus {
            current_power: detector.current_power().unwrap_or(0.0),
            history_len: detector.history_len(),
            window: crate::analysis::summarize(&powers),
            active_appliances: self.tracker.active(),
        }
    }

    pub async fn system_state(&self) -> SystemState {
        let history_len = self.detector.lock().await.history_len();

        let (cpu_usage, memory_usage) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            system.refresh_cpu_usage();
            let memory = if system.total_memory() > 0 {
                system.used_memory() as f32 / system.total_memory() as f32 * 100.0
            } else {
                0.0
            };
            (system.global_cpu_info().cpu_usage(), memory)
        };

        SystemState {
            running: true,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            total_readings: self.total_readings.load(Ordering::Relaxed),
            total_events: self.total_events.load(Ordering::Relaxed),
            identified_events: self.identified_events.load(Ordering::Relaxed),
            history_len,
            active_appliances: self.tracker.active().len(),
            cpu_usage,
            memory_usage,
            last_event: *self.last_event.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::TimeZone;

    fn sample_at(power: f64, secs: i64) -> Sample {
        let mut sample = Sample::new(power);
        sample.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        sample.power_factor = Some(0.85);
        sample
    }

    fn monitor() -> (Arc<Monitor>, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let repo: Arc<dyn ProfileRepository> = db.clone();
        let sink: Arc<dyn EventSink> = db.clone();
        let bus = Arc::new(EventBus::new(64));
        let config = Arc::new(Config::default());
        (Arc::new(Monitor::new(config, repo, sink, bus)), db)
    }

    #[tokio::test]
    async fn rejects_invalid_sample() {
        let (monitor, _db) = monitor();

        let sample = Sample::new(f64::NAN);
        let err = monitor.ingest_sample(sample).await.unwrap_err();
        assert!(err.downcast_ref::<MonitorError>().is_some());
    }

    #[tokio::test]
    async fn steady_then_step_identifies_microwave() {
        let (monitor, db) = monitor();

        for i in 0..15 {
            let outcome = monitor.ingest_sample(sample_at(200.0, i)).await.unwrap();
            assert!(outcome.event.is_none());
        }

        // 1100W step off a 200W plateau
        let outcome = monitor.ingest_sample(sample_at(1300.0, 15)).await.unwrap();
        let detected = outcome.event.expect("event");
        assert!((detected.event.power_change - 1100.0).abs() < 1.0);
        assert!(detected.event.was_steady_before);
        assert!((detected.event.confidence - 1.0).abs() < 1e-9);

        let matched = outcome.matched.expect("match");
        assert_eq!(matched.appliance_name, "Microwave");
        assert!(matched.confidence > 0.4);

        // Tracker flipped, event persisted as identified, profile learned
        assert_eq!(monitor.tracker().get("Microwave").state, OnOff::On);
        let events = db.recent_events(24, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].identified);
        assert_eq!(events[0].appliance_name.as_deref(), Some("Microwave"));

        let profile = db.get("Microwave").unwrap().unwrap();
        assert_eq!(profile.learning_count, 1);
    }

    #[tokio::test]
    async fn unmatched_event_surfaces_for_labeling() {
        let (monitor, db) = monitor();

        for i in 0..15 {
            monitor.ingest_sample(sample_at(200.0, i)).await.unwrap();
        }

        // 250W change matches nothing in the seeded catalogue
        let outcome = monitor.ingest_sample(sample_at(450.0, 15)).await.unwrap();
        let detected = outcome.event.expect("event");
        assert!(outcome.matched.is_none());
        assert!(!detected.event.identified);

        let unlabeled = db.unlabeled_events(24, 10).unwrap();
        assert_eq!(unlabeled.len(), 1);
        assert_eq!(unlabeled[0].id, detected.id);
    }

    #[tokio::test]
    async fn labeling_bootstraps_and_converges() {
        let (monitor, db) = monitor();

        for i in 0..15 {
            monitor.ingest_sample(sample_at(200.0, i)).await.unwrap();
        }
        let outcome = monitor.ingest_sample(sample_at(450.0, 15)).await.unwrap();
        let event_id = outcome.event.unwrap().id;

        monitor.label_event(event_id, "Aquarium Heater", Some(250.0)).await.unwrap();

        let profile = db.get("Aquarium Heater").unwrap().unwrap();
        assert_eq!(profile.learning_count, 1);
        assert!((profile.typical_power - 250.0).abs() < 1e-9);
        assert_eq!(monitor.tracker().get("Aquarium Heater").state, OnOff::On);
        assert!(db.unlabeled_events(24, 10).unwrap().is_empty());

        // Repeated labels drive typical power toward the observation
        for _ in 0..6 {
            monitor.label_event(event_id, "Aquarium Heater", Some(250.0)).await.unwrap();
        }
        let profile = db.get("Aquarium Heater").unwrap().unwrap();
        assert!((profile.typical_power - 250.0).abs() < 1.0);
        assert_eq!(profile.learning_count, 7);
    }

    #[tokio::test]
    async fn labeling_unknown_event_fails() {
        let (monitor, _db) = monitor();

        let err = monitor.label_event(9999, "Kettle", Some(1500.0)).await.unwrap_err();
        match err.downcast_ref::<MonitorError>() {
            Some(MonitorError::UnknownEvent(9999)) => {}
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn add_and_delete_appliance() {
        let (monitor, db) = monitor();

        monitor.add_appliance("Sauna", 2400.0, 1800).await.unwrap();
        assert!(monitor.add_appliance("Sauna", 2400.0, 1800).await.is_err());

        let profile = db.get("Sauna").unwrap().unwrap();
        assert!((profile.min_power - 1680.0).abs() < 1e-9);

        monitor.delete_appliance("Sauna").await.unwrap();
        assert!(db.get("Sauna").unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_clears_pipeline_and_counters() {
        let (monitor, db) = monitor();

        for i in 0..20 {
            monitor.ingest_sample(sample_at(200.0, i)).await.unwrap();
        }
        monitor.reset().await.unwrap();

        let status = monitor.current_status().await;
        assert_eq!(status.history_len, 0);
        assert_eq!(db.recent_samples(10).unwrap().len(), 0);

        let state = monitor.system_state().await;
        assert_eq!(state.total_readings, 0);
        assert_eq!(state.total_events, 0);
    }
}
