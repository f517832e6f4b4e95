// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::streaming::StreamingConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Application version
    pub version: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Enable demo mode (simulated meter)
    pub demo_mode: bool,

    /// Meter source configuration
    pub meter: MeterConfig,

    /// Detection pipeline configuration
    pub detection: DetectionConfig,

    /// Retention sweep configuration
    pub retention: RetentionConfig,

    /// Streaming configuration
    pub streaming: StreamingConfig,

    /// Database configuration
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "WattScope".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            demo_mode: false,
            meter: MeterConfig::default(),
            detection: DetectionConfig::default(),
            retention: RetentionConfig::default(),
            streaming: StreamingConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("wattscope"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Meter source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Identifier of the metering point
    pub source_id: String,

    /// Sample rate in Hz
    pub sample_rate: f64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            source_id: "meter-0".to_string(),
            sample_rate: 1.0,
        }
    }
}

/// Detection pipeline configuration.
///
/// Every tuning constant the pipeline consumes lives here; nothing in the
/// detectors or the matcher is hardcoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Minimum absolute power change, in watts, for an event
    pub power_threshold: f64,

    /// Samples of history required before detection starts
    pub window_size: usize,

    /// Steady-state standard deviation threshold, in watts
    pub std_dev_threshold: f64,

    /// Debounce interval between events, in seconds
    pub min_event_interval_secs: i64,

    /// Ring buffer capacity for recent readings
    pub power_history_size: usize,

    /// Samples needed to confirm a steady state
    pub steady_state_samples: usize,

    /// Trailing samples scanned for a single sharp step
    pub transient_window: usize,

    /// Trailing samples excluded from the pre-event baseline
    pub transient_detection_window: usize,

    /// Confidence floor for a profile to count as a candidate
    pub candidate_floor: f64,

    /// Confidence floor for a match to commit a state change
    pub acceptance_floor: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            power_threshold: 30.0,
            window_size: 15,
            std_dev_threshold: 5.0,
            min_event_interval_secs: 3,
            power_history_size: 100,
            steady_state_samples: 5,
            transient_window: 5,
            transient_detection_window: 10,
            candidate_floor: 0.3,
            acceptance_floor: 0.4,
        }
    }
}

/// Retention sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Sweep period in seconds
    pub sweep_interval_secs: u64,

    /// Days of raw readings to keep
    pub raw_data_days: u32,

    /// Days of events to keep
    pub events_days: u32,

    /// Days of predictions to keep
    pub predictions_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            raw_data_days: 7,
            events_days: 30,
            predictions_days: 30,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Enable database storage
    pub enabled: bool,

    /// Database path
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./data/wattscope.db"),
        }
    }
}
