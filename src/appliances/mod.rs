// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! Appliance catalogue types and per-appliance state

mod tracker;
mod learning;

pub use tracker::StateTracker;
pub use learning::{bootstrap_profile, reinforce_profile};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// On/off state of an appliance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnOff {
    On,
    Off,
}

impl OnOff {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnOff::On => "on",
            OnOff::Off => "off",
        }
    }
}

impl FromStr for OnOff {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(OnOff::On),
            "off" => Ok(OnOff::Off),
            _ => Err(()),
        }
    }
}

impl fmt::Display for OnOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Valid power-factor interval for a profile, stored as "low-high" text in
/// the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerFactorRange {
    pub low: f64,
    pub high: f64,
}

impl PowerFactorRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, pf: f64) -> bool {
        self.low <= pf && pf <= self.high
    }
}

impl Default for PowerFactorRange {
    fn default() -> Self {
        Self { low: 0.80, high: 0.95 }
    }
}

impl fmt::Display for PowerFactorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}-{:.2}", self.low, self.high)
    }
}

impl FromStr for PowerFactorRange {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (low, high) = s.split_once('-').ok_or(())?;
        let low: f64 = low.trim().parse().map_err(|_| ())?;
        let high: f64 = high.trim().parse().map_err(|_| ())?;
        Ok(Self { low, high })
    }
}

/// Learned reference parameters for a named appliance.
///
/// Profiles are created at startup from the seed catalogue or on first
/// labeling of an unknown name, and mutated only through the learning
/// updater. `min_power <= max_power` always; `power_variance > 0` whenever
/// the profile has been observed at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceProfile {
    pub name: String,
    pub typical_power: f64,
    pub typical_duration_secs: i64,
    pub power_variance: f64,
    pub min_power: f64,
    pub max_power: f64,
    pub startup_pattern: String,
    pub shutdown_pattern: String,
    pub power_factor_range: Option<PowerFactorRange>,
    pub frequency_signature: f64,
    pub learning_count: i64,
    pub last_updated: DateTime<Utc>,
}

impl ApplianceProfile {
    /// New catalogue entry derived from a typical power figure, with the
    /// same spread factors the learning updater uses.
    pub fn with_typical_power(name: &str, typical_power: f64, duration_secs: i64) -> Self {
        Self {
            name: name.to_string(),
            typical_power,
            typical_duration_secs: duration_secs,
            power_variance: typical_power * 0.2,
            min_power: typical_power * 0.7,
            max_power: typical_power * 1.3,
            startup_pattern: "unknown".to_string(),
            shutdown_pattern: "unknown".to_string(),
            power_factor_range: Some(PowerFactorRange::default()),
            frequency_signature: 50.0,
            learning_count: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Current believed state of one appliance. Overwritten, never appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceState {
    pub appliance_name: String,
    pub state: OnOff,
    pub power_consumption: f64,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

impl ApplianceState {
    /// Default for an appliance never seen before: off, drawing nothing.
    pub fn unknown(name: &str) -> Self {
        Self {
            appliance_name: name.to_string(),
            state: OnOff::Off,
            power_consumption: 0.0,
            confidence: 0.0,
            updated_at: Utc::now(),
        }
    }
}

struct SeedAppliance {
    name: &'static str,
    typical_power: f64,
    duration_secs: i64,
    variance: f64,
    min_power: f64,
    max_power: f64,
    startup: &'static str,
    shutdown: &'static str,
    pf_low: f64,
    pf_high: f64,
}

const SEED_APPLIANCES: &[SeedAppliance] = &[
    SeedAppliance { name: "Washing Machine", typical_power: 400.0, duration_secs: 3600, variance: 150.0, min_power: 200.0, max_power: 800.0, startup: "motor_start", shutdown: "gradual_off", pf_low: 0.70, pf_high: 0.85 },
    SeedAppliance { name: "Microwave", typical_power: 1100.0, duration_secs: 300, variance: 200.0, min_power: 800.0, max_power: 1500.0, startup: "instant_on", shutdown: "instant_off", pf_low: 0.80, pf_high: 0.90 },
    SeedAppliance { name: "Coffee Maker", typical_power: 900.0, duration_secs: 480, variance: 150.0, min_power: 600.0, max_power: 1200.0, startup: "heating_cycle", shutdown: "instant_off", pf_low: 0.95, pf_high: 0.99 },
    SeedAppliance { name: "Toaster", typical_power: 1300.0, duration_secs: 240, variance: 200.0, min_power: 1000.0, max_power: 1500.0, startup: "instant_on", shutdown: "instant_off", pf_low: 0.95, pf_high: 0.99 },
    SeedAppliance { name: "Dishwasher", typical_power: 1400.0, duration_secs: 7200, variance: 300.0, min_power: 800.0, max_power: 2000.0, startup: "motor_pump", shutdown: "gradual_off", pf_low: 0.75, pf_high: 0.90 },
    SeedAppliance { name: "Air Conditioner", typical_power: 1800.0, duration_secs: 3600, variance: 400.0, min_power: 1200.0, max_power: 2500.0, startup: "compressor_start", shutdown: "gradual_off", pf_low: 0.80, pf_high: 0.95 },
    SeedAppliance { name: "Hair Dryer", typical_power: 1200.0, duration_secs: 600, variance: 200.0, min_power: 800.0, max_power: 1600.0, startup: "instant_on", shutdown: "instant_off", pf_low: 0.95, pf_high: 0.99 },
    SeedAppliance { name: "Electric Kettle", typical_power: 1500.0, duration_secs: 300, variance: 200.0, min_power: 1200.0, max_power: 1800.0, startup: "instant_on", shutdown: "instant_off", pf_low: 0.95, pf_high: 0.99 },
    SeedAppliance { name: "Vacuum Cleaner", typical_power: 1000.0, duration_secs: 900, variance: 200.0, min_power: 600.0, max_power: 1400.0, startup: "motor_start", shutdown: "instant_off", pf_low: 0.75, pf_high: 0.90 },
];

/// The common-appliance catalogue seeded into an empty profile store.
pub fn seed_catalogue() -> Vec<ApplianceProfile> {
    SEED_APPLIANCES
        .iter()
        .map(|seed| ApplianceProfile {
            name: seed.name.to_string(),
            typical_power: seed.typical_power,
            typical_duration_secs: seed.duration_secs,
            power_variance: seed.variance,
            min_power: seed.min_power,
            max_power: seed.max_power,
            startup_pattern: seed.startup.to_string(),
            shutdown_pattern: seed.shutdown.to_string(),
            power_factor_range: Some(PowerFactorRange::new(seed.pf_low, seed.pf_high)),
            frequency_signature: 50.0,
            learning_count: 0,
            last_updated: Utc::now(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_factor_range_round_trip() {
        let range: PowerFactorRange = "0.70-0.85".parse().unwrap();
        assert!((range.low - 0.70).abs() < 1e-9);
        assert!((range.high - 0.85).abs() < 1e-9);
        assert_eq!(range.to_string(), "0.70-0.85");

        assert!(range.contains(0.75));
        assert!(!range.contains(0.90));
        assert!("garbage".parse::<PowerFactorRange>().is_err());
    }

    #[test]
    fn seed_catalogue_invariants() {
        let catalogue = seed_catalogue();
        assert_eq!(catalogue.len(), 9);

        for profile in &catalogue {
            assert!(profile.min_power <= profile.max_power, "{}", profile.name);
            assert!(profile.power_variance > 0.0);
            assert_eq!(profile.learning_count, 0);
        }

        assert!(catalogue.iter().any(|p| p.name == "Microwave" && p.typical_power == 1100.0));
    }

    #[test]
    fn unknown_state_defaults_to_off() {
        let state = ApplianceState::unknown("Sauna");
        assert_eq!(state.state, OnOff::Off);
        assert_eq!(state.power_consumption, 0.0);
        assert_eq!(state.confidence, 0.0);
    }
}
