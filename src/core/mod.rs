//! Core module - the serialized detection pipeline and its plumbing

mod engine;
mod event_bus;
mod scheduler;

pub use engine::{CurrentStatus, DetectedEvent, IngestOutcome, Monitor};
pub use event_bus::{EventBus, Notification, NotificationPayload, Topic};
pub use scheduler::RetentionSweeper;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed failures of the monitoring core.
///
/// Insufficient history and no-match outcomes are not failures; they are
/// ordinary `None` results. Collaborator failures propagate with context
/// via `anyhow`.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Sample arrived without a usable power reading; rejected at the
    /// ingestion boundary before touching the pipeline.
    #[error("sample is missing a usable power reading")]
    InvalidSample,

    /// A label referenced an event id that does not exist.
    #[error("no event with id {0}")]
    UnknownEvent(i64),
}

/// System-wide state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub running: bool,
    pub uptime_seconds: u64,
    pub total_readings: u64,
    pub total_events: u64,
    pub identified_events: u64,
    pub history_len: usize,
    pub active_appliances: usize,
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub last_event: Option<DateTime<Utc>>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            running: false,
            uptime_seconds: 0,
            total_readings: 0,
            total_events: 0,
            identified_events: 0,
            history_len: 0,
            active_appliances: 0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            last_event: None,
        }
    }
}
