//! In-memory per-appliance state tracking

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use super::{ApplianceState, OnOff};

/// Live on/off state per appliance name.
///
/// Read by the matcher to judge transition plausibility and by the live
/// views; written after every accepted match or user label. Last writer
/// wins. Internal locking keeps reads off the sample-processing lock.
pub struct StateTracker {
    states: RwLock<HashMap<String, ApplianceState>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// State for `name`, defaulting to off/0W/0 confidence when the
    /// appliance has never been observed.
    pub fn get(&self, name: &str) -> ApplianceState {
        self.states
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| ApplianceState::unknown(name))
    }

    /// Full overwrite of the record for `name`.
    pub fn set(&self, name: &str, state: OnOff, power: f64, confidence: f64) -> ApplianceState {
        let record = ApplianceState {
            appliance_name: name.to_string(),
            state,
            power_consumption: power,
            confidence,
            updated_at: Utc::now(),
        };
        self.states.write().insert(name.to_string(), record.clone());
        record
    }

    /// All tracked appliances, newest update first.
    pub fn snapshot(&self) -> Vec<ApplianceState> {
        let mut all: Vec<ApplianceState> = self.states.read().values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    /// Appliances currently believed to be on.
    pub fn active(&self) -> Vec<ApplianceState> {
        self.states
            .read()
            .values()
            .filter(|s| s.state == OnOff::On)
            .cloned()
            .collect()
    }

    pub fn remove(&self, name: &str) {
        self.states.write().remove(name);
    }

    pub fn clear(&self) {
        self.states.write().clear();
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_appliance_defaults_to_off() {
        let tracker = StateTracker::new();
        let state = tracker.get("Microwave");
        assert_eq!(state.state, OnOff::Off);
        assert_eq!(state.power_consumption, 0.0);
    }

    #[test]
    fn set_overwrites() {
        let tracker = StateTracker::new();
        tracker.set("Kettle", OnOff::On, 1500.0, 0.8);
        tracker.set("Kettle", OnOff::Off, 0.0, 0.9);

        let state = tracker.get("Kettle");
        assert_eq!(state.state, OnOff::Off);
        assert!((state.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn active_filters_on_states() {
        let tracker = StateTracker::new();
        tracker.set("Kettle", OnOff::On, 1500.0, 0.8);
        tracker.set("Toaster", OnOff::Off, 0.0, 0.7);

        let active = tracker.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].appliance_name, "Kettle");
    }
}
