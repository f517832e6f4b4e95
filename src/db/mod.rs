// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! Database module for persistent storage

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::appliances::{seed_catalogue, ApplianceProfile, ApplianceState, OnOff};
use crate::config::{DatabaseConfig, RetentionConfig};
use crate::detection::{PowerEvent, SignalFlags};
use crate::meter::Sample;

/// Learned appliance catalogue, read and written by the core.
pub trait ProfileRepository: Send + Sync {
    fn list(&self) -> Result<Vec<ApplianceProfile>>;
    fn get(&self, name: &str) -> Result<Option<ApplianceProfile>>;
    fn upsert(&self, profile: &ApplianceProfile) -> Result<()>;
    fn delete(&self, name: &str) -> Result<()>;
}

/// Persistence of readings, events, predictions, feedback and appliance
/// states. The core never sees SQL; it talks to this interface.
pub trait EventSink: Send + Sync {
    fn record_sample(&self, sample: &Sample, flags: SignalFlags) -> Result<()>;
    fn record_event(&self, event: &PowerEvent) -> Result<i64>;

    /// Returns false when no such event exists.
    fn mark_identified(&self, event_id: i64) -> Result<bool>;

    fn record_prediction(
        &self,
        event_id: i64,
        appliance_name: &str,
        power: f64,
        state: OnOff,
        confidence: f64,
    ) -> Result<()>;

    fn record_feedback(
        &self,
        event_id: Option<i64>,
        event_timestamp: Option<DateTime<Utc>>,
        appliance_name: &str,
        power_change: Option<f64>,
    ) -> Result<()>;

    fn upsert_state(&self, state: &ApplianceState) -> Result<()>;

    /// Cascading removal of every row referencing an appliance.
    fn delete_appliance_data(&self, name: &str) -> Result<()>;

    /// Clears all measurement data and resets learning counts.
    fn reset_data(&self) -> Result<()>;
}

/// Database manager
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// A persisted event row, as served to clients.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub timestamp: String,
    pub power_change: f64,
    pub power_before: f64,
    pub power_after: f64,
    pub event_type: String,
    pub confidence: f64,
    pub identified: bool,
    pub appliance_name: Option<String>,
    pub prediction_confidence: Option<f64>,
}

/// A persisted raw reading row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredSample {
    pub id: i64,
    pub timestamp: String,
    pub power: f64,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub energy: Option<f64>,
    pub frequency: Option<f64>,
    pub power_factor: Option<f64>,
    pub steady_state: bool,
    pub transient_detected: bool,
}

/// Statistics rollup over a recent window.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SystemStatistics {
    pub total_readings: i64,
    pub steady_readings: i64,
    pub transient_readings: i64,
    pub avg_power: f64,
    pub min_power: f64,
    pub max_power: f64,
    pub total_events: i64,
    pub identified_events: i64,
    pub avg_event_confidence: f64,
    pub identification_rate: f64,
    pub appliance_detections: Vec<(String, i64)>,
}

impl Database {
    /// Open or create database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&config.path)?;
        let db = Self::from_connection(conn)?;
        info!("Database opened at {:?}", config.path);
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.create_tables()?;
        db.seed_known_appliances()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Raw meter readings
            CREATE TABLE IF NOT EXISTS raw_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                voltage REAL,
                current REAL,
                power REAL NOT NULL,
                energy REAL,
                frequency REAL,
                power_factor REAL,
                rssi INTEGER,
                heap INTEGER,
                steady_state INTEGER DEFAULT 0,
                transient_detected INTEGER DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_raw_data_timestamp ON raw_data(timestamp);

            -- Detected load-change events
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                power_change REAL NOT NULL,
                power_before REAL NOT NULL,
                power_after REAL NOT NULL,
                transient_magnitude REAL DEFAULT 0.0,
                was_steady INTEGER DEFAULT 0,
                event_type TEXT NOT NULL,
                confidence REAL DEFAULT 0.0,
                identified INTEGER DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_identified ON events(identified);
            CREATE INDEX IF NOT EXISTS idx_events_confidence ON events(confidence);

            -- Appliance predictions per event
            CREATE TABLE IF NOT EXISTS appliance_predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                appliance_name TEXT NOT NULL,
                power_consumption REAL,
                state TEXT NOT NULL,
                confidence REAL DEFAULT 0.0,
                event_id INTEGER,
                FOREIGN KEY (event_id) REFERENCES events (id)
            );

            CREATE INDEX IF NOT EXISTS idx_appliance_predictions_timestamp
                ON appliance_predictions(timestamp);

            -- User labels
            CREATE TABLE IF NOT EXISTS user_feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_timestamp TEXT,
                appliance_name TEXT NOT NULL,
                power_change REAL,
                confirmed INTEGER DEFAULT 1,
                event_id INTEGER,
                FOREIGN KEY (event_id) REFERENCES events (id)
            );

            -- Learned appliance catalogue
            CREATE TABLE IF NOT EXISTS known_appliances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                typical_power REAL NOT NULL,
                typical_duration INTEGER DEFAULT 60,
                power_variance REAL NOT NULL,
                min_power REAL NOT NULL,
                max_power REAL NOT NULL,
                startup_pattern TEXT DEFAULT 'unknown',
                shutdown_pattern TEXT DEFAULT 'unknown',
                power_factor_range TEXT,
                frequency_signature REAL DEFAULT 50.0,
                learning_count INTEGER DEFAULT 0,
                last_updated TEXT NOT NULL
            );

            -- Current believed appliance states
            CREATE TABLE IF NOT EXISTS appliance_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                appliance_name TEXT NOT NULL UNIQUE,
                state TEXT NOT NULL,
                power_consumption REAL,
                confidence REAL DEFAULT 0.0,
                timestamp TEXT NOT NULL
            );
        "#,
        )?;

        Ok(())
    }

    fn seed_known_appliances(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        for profile in seed_catalogue() {
            conn.execute(
                r#"INSERT OR IGNORE INTO known_appliances
                   (name, typical_power, typical_duration, power_variance, min_power, max_power,
                    startup_pattern, shutdown_pattern, power_factor_range, frequency_signature,
                    learning_count, last_updated)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
                params![
                    profile.name,
                    profile.typical_power,
                    profile.typical_duration_secs,
                    profile.power_variance,
                    profile.min_power,
                    profile.max_power,
                    profile.startup_pattern,
                    profile.shutdown_pattern,
                    profile.power_factor_range.map(|r| r.to_string()),
                    profile.frequency_signature,
                    profile.learning_count,
                    profile.last_updated.to_rfc3339(),
                ],
            )?;
        }

        Ok(())
    }

    fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApplianceProfile> {
        let pf_range: Option<String> = row.get(8)?;
        let last_updated: String = row.get(11)?;

        Ok(ApplianceProfile {
            name: row.get(0)?,
            typical_power: row.get(1)?,
            typical_duration_secs: row.get(2)?,
            power_variance: row.get(3)?,
            min_power: row.get(4)?,
            max_power: row.get(5)?,
            startup_pattern: row.get(6)?,
            shutdown_pattern: row.get(7)?,
            power_factor_range: pf_range.and_then(|s| s.parse().ok()),
            frequency_signature: row.get(9)?,
            learning_count: row.get(10)?,
            last_updated: parse_timestamp(&last_updated),
        })
    }

    const PROFILE_COLUMNS: &'static str = "name, typical_power, typical_duration, power_variance, \
         min_power, max_power, startup_pattern, shutdown_pattern, power_factor_range, \
         frequency_signature, learning_count, last_updated";

    /// Recent raw readings, newest first.
    pub fn recent_samples(&self, limit: usize) -> Result<Vec<StoredSample>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, power, voltage, current, energy, frequency, power_factor, \
                    steady_state, transient_detected \
             FROM raw_data ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(StoredSample {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                power: row.get(2)?,
                voltage: row.get(3)?,
                current: row.get(4)?,
                energy: row.get(5)?,
                frequency: row.get(6)?,
                power_factor: row.get(7)?,
                steady_state: row.get::<_, i64>(8)? != 0,
                transient_detected: row.get::<_, i64>(9)? != 0,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Events from the last `hours`, newest first, joined with any
    /// prediction that identified them.
    pub fn recent_events(&self, hours: i64, limit: usize) -> Result<Vec<StoredEvent>> {
        let cutoff = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT e.id, e.timestamp, e.power_change, e.power_before, e.power_after, \
                    e.event_type, e.confidence, e.identified, ap.appliance_name, ap.confidence \
             FROM events e \
             LEFT JOIN appliance_predictions ap ON e.id = ap.event_id \
             WHERE e.timestamp > ?1 \
             ORDER BY e.timestamp DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![cutoff, limit as i64], Self::row_to_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Events not yet identified, highest detection confidence first.
    pub fn unlabeled_events(&self, hours: i64, limit: usize) -> Result<Vec<StoredEvent>> {
        let cutoff = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, power_change, power_before, power_after, \
                    event_type, confidence, identified, NULL, NULL \
             FROM events \
             WHERE identified = 0 AND timestamp > ?1 \
             ORDER BY confidence DESC, timestamp DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![cutoff, limit as i64], Self::row_to_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEvent> {
        Ok(StoredEvent {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            power_change: row.get(2)?,
            power_before: row.get(3)?,
            power_after: row.get(4)?,
            event_type: row.get(5)?,
            confidence: row.get(6)?,
            identified: row.get::<_, i64>(7)? != 0,
            appliance_name: row.get(8)?,
            prediction_confidence: row.get(9)?,
        })
    }

    /// Persisted appliance states, newest update first.
    pub fn appliance_states(&self) -> Result<Vec<ApplianceState>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT appliance_name, state, power_consumption, confidence, timestamp \
             FROM appliance_states ORDER BY timestamp DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let state: String = row.get(1)?;
            let timestamp: String = row.get(4)?;
            Ok(ApplianceState {
                appliance_name: row.get(0)?,
                state: state.parse().unwrap_or(OnOff::Off),
                power_consumption: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                confidence: row.get(3)?,
                updated_at: parse_timestamp(&timestamp),
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Count of raw readings newer than `hours` ago, for health checks.
    pub fn recent_sample_count(&self, hours: i64) -> Result<i64> {
        let cutoff = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        let conn = self.conn.lock().unwrap();

        let count = conn.query_row(
            "SELECT COUNT(*) FROM raw_data WHERE timestamp > ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Statistics rollup over the last `hours`.
    pub fn statistics(&self, hours: i64) -> Result<SystemStatistics> {
        let cutoff = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        let conn = self.conn.lock().unwrap();

        let mut stats = conn.query_row(
            "SELECT COUNT(*), \
                    COUNT(CASE WHEN steady_state = 1 THEN 1 END), \
                    COUNT(CASE WHEN transient_detected = 1 THEN 1 END), \
                    COALESCE(AVG(power), 0.0), COALESCE(MIN(power), 0.0), COALESCE(MAX(power), 0.0) \
             FROM raw_data WHERE timestamp > ?1",
            params![cutoff],
            |row| {
                Ok(SystemStatistics {
                    total_readings: row.get(0)?,
                    steady_readings: row.get(1)?,
                    transient_readings: row.get(2)?,
                    avg_power: row.get(3)?,
                    min_power: row.get(4)?,
                    max_power: row.get(5)?,
                    ..Default::default()
                })
            },
        )?;

        let (total_events, identified_events, avg_confidence): (i64, i64, f64) = conn.query_row(
            "SELECT COUNT(*), \
                    COUNT(CASE WHEN identified = 1 THEN 1 END), \
                    COALESCE(AVG(confidence), 0.0) \
             FROM events WHERE timestamp > ?1",
            params![cutoff],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        stats.total_events = total_events;
        stats.identified_events = identified_events;
        stats.avg_event_confidence = avg_confidence;
        stats.identification_rate = if total_events > 0 {
            (identified_events as f64 / total_events as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        let mut stmt = conn.prepare(
            "SELECT appliance_name, COUNT(*) as detection_count \
             FROM appliance_predictions WHERE timestamp > ?1 \
             GROUP BY appliance_name ORDER BY detection_count DESC LIMIT 10",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?;
        stats.appliance_detections = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(stats)
    }

    /// Delete rows past their retention period. Returns rows removed.
    pub fn cleanup(&self, retention: &RetentionConfig) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let raw_cutoff = (Utc::now() - chrono::Duration::days(retention.raw_data_days as i64)).to_rfc3339();
        let event_cutoff = (Utc::now() - chrono::Duration::days(retention.events_days as i64)).to_rfc3339();
        let prediction_cutoff =
            (Utc::now() - chrono::Duration::days(retention.predictions_days as i64)).to_rfc3339();

        let deleted_raw = conn.execute("DELETE FROM raw_data WHERE timestamp < ?1", params![raw_cutoff])?;
        let deleted_events = conn.execute("DELETE FROM events WHERE timestamp < ?1", params![event_cutoff])?;
        let deleted_predictions = conn.execute(
            "DELETE FROM appliance_predictions WHERE timestamp < ?1",
            params![prediction_cutoff],
        )?;

        info!(
            "Retention sweep removed {} readings, {} events, {} predictions",
            deleted_raw, deleted_events, deleted_predictions
        );

        Ok(deleted_raw + deleted_events + deleted_predictions)
    }
}

impl ProfileRepository for Database {
    fn list(&self) -> Result<Vec<ApplianceProfile>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM known_appliances ORDER BY learning_count DESC, name ASC",
            Self::PROFILE_COLUMNS
        ))?;

        let rows = stmt.query_map([], Self::row_to_profile)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get(&self, name: &str) -> Result<Option<ApplianceProfile>> {
        let conn = self.conn.lock().unwrap();

        let profile = conn
            .query_row(
                &format!("SELECT {} FROM known_appliances WHERE name = ?1", Self::PROFILE_COLUMNS),
                params![name],
                Self::row_to_profile,
            )
            .optional()?;

        Ok(profile)
    }

    fn upsert(&self, profile: &ApplianceProfile) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"INSERT INTO known_appliances
               (name, typical_power, typical_duration, power_variance, min_power, max_power,
                startup_pattern, shutdown_pattern, power_factor_range, frequency_signature,
                learning_count, last_updated)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
               ON CONFLICT(name) DO UPDATE SET
                typical_power = excluded.typical_power,
                typical_duration = excluded.typical_duration,
                power_variance = excluded.power_variance,
                min_power = excluded.min_power,
                max_power = excluded.max_power,
                startup_pattern = excluded.startup_pattern,
                shutdown_pattern = excluded.shutdown_pattern,
                power_factor_range = excluded.power_factor_range,
                frequency_signature = excluded.frequency_signature,
                learning_count = excluded.learning_count,
                last_updated = excluded.last_updated"#,
            params![
                profile.name,
                profile.typical_power,
                profile.typical_duration_secs,
                profile.power_variance,
                profile.min_power,
                profile.max_power,
                profile.startup_pattern,
                profile.shutdown_pattern,
                profile.power_factor_range.map(|r| r.to_string()),
                profile.frequency_signature,
                profile.learning_count,
                profile.last_updated.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM known_appliances WHERE name = ?1", params![name])?;
        Ok(())
    }
}

impl EventSink for Database {
    fn record_sample(&self, sample: &Sample, flags: SignalFlags) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"INSERT INTO raw_data
               (timestamp, voltage, current, power, energy, frequency, power_factor,
                rssi, heap, steady_state, transient_detected)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                sample.timestamp.to_rfc3339(),
                sample.voltage,
                sample.current,
                sample.power,
                sample.energy,
                sample.frequency,
                sample.power_factor,
                sample.rssi,
                sample.heap,
                flags.steady_state as i64,
                flags.transient_detected as i64,
            ],
        )?;

        Ok(())
    }

    fn record_event(&self, event: &PowerEvent) -> Result<i64> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"INSERT INTO events
               (timestamp, power_change, power_before, power_after, transient_magnitude,
                was_steady, event_type, confidence, identified)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                event.detected_at.to_rfc3339(),
                event.power_change,
                event.power_before,
                event.power_after,
                event.transient_magnitude,
                event.was_steady_before as i64,
                match event.kind {
                    crate::detection::EventKind::On => "on",
                    crate::detection::EventKind::Off => "off",
                },
                event.confidence,
                event.identified as i64,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn mark_identified(&self, event_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute("UPDATE events SET identified = 1 WHERE id = ?1", params![event_id])?;
        Ok(updated > 0)
    }

    fn record_prediction(
        &self,
        event_id: i64,
        appliance_name: &str,
        power: f64,
        state: OnOff,
        confidence: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"INSERT INTO appliance_predictions
               (timestamp, appliance_name, power_consumption, state, confidence, event_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                Utc::now().to_rfc3339(),
                appliance_name,
                power,
                state.as_str(),
                confidence,
                event_id,
            ],
        )?;

        Ok(())
    }

    fn record_feedback(
        &self,
        event_id: Option<i64>,
        event_timestamp: Option<DateTime<Utc>>,
        appliance_name: &str,
        power_change: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"INSERT INTO user_feedback
               (timestamp, event_timestamp, appliance_name, power_change, confirmed, event_id)
               VALUES (?1, ?2, ?3, ?4, 1, ?5)"#,
            params![
                Utc::now().to_rfc3339(),
                event_timestamp.map(|t| t.to_rfc3339()),
                appliance_name,
                power_change,
                event_id,
            ],
        )?;

        Ok(())
    }

    fn upsert_state(&self, state: &ApplianceState) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"INSERT OR REPLACE INTO appliance_states
               (appliance_name, state, power_consumption, confidence, timestamp)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                state.appliance_name,
                state.state.as_str(),
                state.power_consumption,
                state.confidence,
                state.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    fn delete_appliance_data(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute("DELETE FROM appliance_predictions WHERE appliance_name = ?1", params![name])?;
        conn.execute("DELETE FROM appliance_states WHERE appliance_name = ?1", params![name])?;
        conn.execute("DELETE FROM user_feedback WHERE appliance_name = ?1", params![name])?;
        conn.execute("DELETE FROM known_appliances WHERE name = ?1", params![name])?;

        Ok(())
    }

    fn reset_data(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            DELETE FROM raw_data;
            DELETE FROM events;
            DELETE FROM appliance_predictions;
            DELETE FROM appliance_states;
            DELETE FROM user_feedback;
            UPDATE known_appliances SET learning_count = 0;
        "#,
        )?;

        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn test_event(power_change: f64) -> PowerEvent {
        PowerEvent {
            detected_at: Utc::now(),
            kind: PowerEvent::kind_of(power_change),
            power_before: 200.0,
            power_after: 200.0 + power_change,
            power_change,
            transient_magnitude: power_change.abs(),
            was_steady_before: true,
            confidence: 0.9,
            voltage: Some(230.0),
            current: Some(4.8),
            power_factor: Some(0.85),
            identified: false,
        }
    }

    #[test]
    fn seeds_common_appliances() {
        let db = db();
        let profiles = db.list().unwrap();

        assert_eq!(profiles.len(), 9);
        let microwave = db.get("Microwave").unwrap().unwrap();
        assert_eq!(microwave.typical_power, 1100.0);
        assert_eq!(microwave.min_power, 800.0);
        assert_eq!(microwave.max_power, 1500.0);
        let range = microwave.power_factor_range.unwrap();
        assert!((range.low - 0.80).abs() < 1e-9);
    }

    #[test]
    fn seeding_is_idempotent() {
        let db = db();
        db.seed_known_appliances().unwrap();
        assert_eq!(db.list().unwrap().len(), 9);
    }

    #[test]
    fn upsert_round_trip_preserves_learning() {
        let db = db();

        let mut profile = db.get("Electric Kettle").unwrap().unwrap();
        crate::appliances::reinforce_profile(&mut profile, 1450.0);
        db.upsert(&profile).unwrap();

        let reloaded = db.get("Electric Kettle").unwrap().unwrap();
        assert_eq!(reloaded.learning_count, 1);
        assert!((reloaded.typical_power - profile.typical_power).abs() < 1e-9);
    }

    #[test]
    fn list_orders_by_learning_count() {
        let db = db();

        let mut toaster = db.get("Toaster").unwrap().unwrap();
        toaster.learning_count = 7;
        db.upsert(&toaster).unwrap();

        let profiles = db.list().unwrap();
        assert_eq!(profiles[0].name, "Toaster");
    }

    #[test]
    fn event_record_and_mark_identified() {
        let db = db();

        let id = db.record_event(&test_event(900.0)).unwrap();
        assert!(db.mark_identified(id).unwrap());
        assert!(!db.mark_identified(id + 999).unwrap());

        let events = db.recent_events(24, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].identified);
        assert_eq!(events[0].event_type, "on");
    }

    #[test]
    fn unlabeled_events_excludes_identified() {
        let db = db();

        let a = db.record_event(&test_event(900.0)).unwrap();
        let _b = db.record_event(&test_event(-400.0)).unwrap();
        db.mark_identified(a).unwrap();

        let unlabeled = db.unlabeled_events(24, 20).unwrap();
        assert_eq!(unlabeled.len(), 1);
        assert!((unlabeled[0].power_change + 400.0).abs() < 1e-9);
    }

    #[test]
    fn sample_persistence_and_statistics() {
        let db = db();

        let mut sample = Sample::new(200.0);
        sample.power_factor = Some(0.9);
        let flags = SignalFlags { steady_state: true, transient_detected: false };

        for _ in 0..5 {
            db.record_sample(&sample, flags).unwrap();
        }
        db.record_event(&test_event(900.0)).unwrap();

        let stats = db.statistics(24).unwrap();
        assert_eq!(stats.total_readings, 5);
        assert_eq!(stats.steady_readings, 5);
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.identified_events, 0);
        assert_eq!(stats.identification_rate, 0.0);
        assert!((stats.avg_power - 200.0).abs() < 1e-9);

        let samples = db.recent_samples(10).unwrap();
        assert_eq!(samples.len(), 5);
        assert!(samples[0].steady_state);
    }

    #[test]
    fn state_upsert_overwrites() {
        let db = db();

        let mut state = ApplianceState::unknown("Microwave");
        state.state = OnOff::On;
        state.power_consumption = 1100.0;
        state.confidence = 0.8;
        db.upsert_state(&state).unwrap();

        state.state = OnOff::Off;
        state.power_consumption = 0.0;
        db.upsert_state(&state).unwrap();

        let states = db.appliance_states().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].state, OnOff::Off);
    }

    #[test]
    fn delete_appliance_cascades() {
        let db = db();

        let id = db.record_event(&test_event(900.0)).unwrap();
        db.record_prediction(id, "Microwave", 900.0, OnOff::On, 0.8).unwrap();
        db.record_feedback(Some(id), None, "Microwave", Some(900.0)).unwrap();
        let mut state = ApplianceState::unknown("Microwave");
        state.state = OnOff::On;
        db.upsert_state(&state).unwrap();

        db.delete_appliance_data("Microwave").unwrap();

        assert!(db.get("Microwave").unwrap().is_none());
        assert!(db.appliance_states().unwrap().is_empty());
        let stats = db.statistics(24).unwrap();
        assert!(stats.appliance_detections.is_empty());
    }

    #[test]
    fn reset_clears_data_but_keeps_catalogue() {
        let db = db();

        db.record_event(&test_event(900.0)).unwrap();
        let mut toaster = db.get("Toaster").unwrap().unwrap();
        toaster.learning_count = 4;
        db.upsert(&toaster).unwrap();

        db.reset_data().unwrap();

        assert_eq!(db.recent_events(24, 10).unwrap().len(), 0);
        let profiles = db.list().unwrap();
        assert_eq!(profiles.len(), 9);
        assert!(profiles.iter().all(|p| p.learning_count == 0));
    }

    #[test]
    fn cleanup_removes_only_old_rows() {
        let db = db();

        let mut old_event = test_event(500.0);
        old_event.detected_at = Utc::now() - chrono::Duration::days(45);
        db.record_event(&old_event).unwrap();
        db.record_event(&test_event(900.0)).unwrap();

        let removed = db
            .cleanup(&RetentionConfig { sweep_interval_secs: 3600, raw_data_days: 7, events_days: 30, predictions_days: 30 })
            .unwrap();

        assert_eq!(removed, 1);
        // A window wide enough for the survivor but not the deleted row
        let survivors = db.recent_events(24 * 60, 10).unwrap();
        assert_eq!(survivors.len(), 1);
        assert!((survivors[0].power_change - 900.0).abs() < 1e-9);
    }
}
