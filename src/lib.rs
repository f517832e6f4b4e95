// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! WattScope - Non-Intrusive Load Monitoring Engine
//!
//! A high-performance NILM service that infers which appliance switched on
//! or off from a single metering point, without per-appliance sensors:
//! - Sliding-window steady-state and transient analysis over the power feed
//! - Debounced load-change event detection with explainable confidence
//! - Rule-based appliance matching against a learned profile catalogue
//! - Online profile learning from detections and user labels
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WattScope Monitor                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐  ┌──────────┐  ┌───────────┐  ┌────────────┐  │
//! │  │  Meter  │→ │ Analysis │→ │ Detection │→ │ Appliances │  │
//! │  │ Sources │  │ Windows  │  │ + Matcher │  │ + Learning │  │
//! │  └─────────┘  └──────────┘  └───────────┘  └────────────┘  │
//! │       ↓            ↓             ↓              ↓          │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │                     Event Bus                        │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! │       ↓                      ↓                  ↓          │
//! │  ┌─────────┐          ┌───────────┐      ┌────────────┐    │
//! │  │ Database│          │ WebSocket │      │ MQTT/Export│    │
//! │  └─────────┘          └───────────┘      └────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod core;
pub mod meter;
pub mod analysis;
pub mod detection;
pub mod appliances;
pub mod streaming;
pub mod config;
pub mod db;

// Re-exports for convenience
pub use config::Config;
pub use core::{EventBus, Monitor, MonitorError, RetentionSweeper, SystemState};
pub use meter::{MeterSimulator, MeterSource, Sample};
pub use analysis::{SampleWindow, SteadyStateDetector, TransientDetector};
pub use detection::{ApplianceMatcher, EventDetector, MatchResult, PowerEvent};
pub use appliances::{ApplianceProfile, ApplianceState, StateTracker};
pub use streaming::StreamingManager;
pub use db::Database;

/// WattScope version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WattScope name
pub const NAME: &str = "WattScope";

/// Build info
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION.to_string(),
        rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
        target: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
    }
}

/// Build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Version string
    pub version: String,
    /// Rust version
    pub rust_version: String,
    /// Target architecture
    pub target: String,
    /// Operating system
    pub os: String,
}
