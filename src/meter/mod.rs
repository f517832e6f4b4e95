// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! Meter traits and common types

mod simulator;

pub use simulator::MeterSimulator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use anyhow::Result;

/// A single electrical reading from the metering point.
///
/// `power` is the primary analytic signal; everything else is optional
/// context. `rssi` and `heap` are telemetry from ESP32-class meter firmware
/// and are carried through to storage untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,

    /// Active power in watts. Mandatory.
    pub power: f64,

    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub energy: Option<f64>,
    pub frequency: Option<f64>,
    pub power_factor: Option<f64>,

    // Meter firmware telemetry
    pub rssi: Option<i32>,
    pub heap: Option<i64>,
}

impl Sample {
    pub fn new(power: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            power,
            voltage: None,
            current: None,
            energy: None,
            frequency: None,
            power_factor: None,
            rssi: None,
            heap: None,
        }
    }

    /// Readings with a missing or non-finite power field are rejected at the
    /// ingestion boundary before they reach the detection pipeline.
    pub fn is_valid(&self) -> bool {
        self.power.is_finite()
    }
}

/// Meter connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeterStatus {
    Disconnected,
    Connecting,
    Active,
    Error,
}

/// Trait for sample sources feeding the monitor
#[async_trait]
pub trait MeterSource: Send + Sync {
    /// Unique identifier for this source
    fn id(&self) -> &str;

    /// Current status
    fn status(&self) -> MeterStatus;

    /// Sample rate in Hz
    fn sample_rate(&self) -> f64;

    /// Connect to the meter
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the meter
    async fn disconnect(&mut self) -> Result<()>;

    /// Read the next sample
    async fn read(&mut self) -> Result<Sample>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_finite_power() {
        let mut sample = Sample::new(230.0);
        assert!(sample.is_valid());

        sample.power = f64::NAN;
        assert!(!sample.is_valid());

        sample.power = f64::INFINITY;
        assert!(!sample.is_valid());
    }
}
