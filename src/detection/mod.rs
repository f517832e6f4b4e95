//! Detection module - load-change events and appliance matching

mod detector;
mod matcher;

pub use detector::*;
pub use matcher::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a load change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    On,
    Off,
}

/// A detected load-change event.
///
/// Immutable once created, except for `identified`, which flips to true
/// when a match is accepted or a user label arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerEvent {
    pub detected_at: DateTime<Utc>,
    pub kind: EventKind,

    pub power_before: f64,
    pub power_after: f64,
    pub power_change: f64,

    /// Largest single step seen by the transient scan
    pub transient_magnitude: f64,

    /// Whether the pre-event region was a steady plateau
    pub was_steady_before: bool,

    /// Detection confidence in [0, 1]
    pub confidence: f64,

    // Electrical context captured with the triggering sample
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power_factor: Option<f64>,

    pub identified: bool,
}

impl PowerEvent {
    pub fn kind_of(power_change: f64) -> EventKind {
        if power_change > 0.0 {
            EventKind::On
        } else {
            EventKind::Off
        }
    }
}
