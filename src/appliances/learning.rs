//! Online profile learning

use chrono::Utc;

use super::ApplianceProfile;

/// Folds one confirmed observation into an existing profile.
///
/// Typical power moves halfway toward the observation; variance and the
/// min/max envelope only ever widen, so a profile never "forgets" a power
/// level it has genuinely been observed at.
pub fn reinforce_profile(profile: &mut ApplianceProfile, observed_power: f64) {
    let magnitude = observed_power.abs();

    profile.typical_power = (profile.typical_power + magnitude) / 2.0;
    profile.power_variance = profile.power_variance.max(magnitude * 0.2);
    profile.min_power = profile.min_power.min(magnitude * 0.7);
    profile.max_power = profile.max_power.max(magnitude * 1.3);
    profile.learning_count += 1;
    profile.last_updated = Utc::now();
}

/// Creates a profile for an appliance name seen for the first time in a
/// user label.
pub fn bootstrap_profile(name: &str, observed_power: f64) -> ApplianceProfile {
    let magnitude = observed_power.abs();
    let mut profile = ApplianceProfile::with_typical_power(name, magnitude, 60);
    profile.learning_count = 1;
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_labels_converge_on_observed_power() {
        let mut profile = ApplianceProfile::with_typical_power("Space Heater", 500.0, 60);

        for _ in 0..12 {
            reinforce_profile(&mut profile, 2000.0);
        }

        assert!((profile.typical_power - 2000.0).abs() < 1.0);
        assert_eq!(profile.learning_count, 12);
    }

    #[test]
    fn learning_count_strictly_increases() {
        let mut profile = ApplianceProfile::with_typical_power("Fan", 60.0, 60);
        let mut last = profile.learning_count;

        for _ in 0..5 {
            reinforce_profile(&mut profile, 65.0);
            assert!(profile.learning_count > last);
            last = profile.learning_count;
        }
    }

    #[test]
    fn envelope_only_widens() {
        let mut profile = ApplianceProfile::with_typical_power("Dryer", 1000.0, 60);
        let (min0, max0) = (profile.min_power, profile.max_power);

        reinforce_profile(&mut profile, 1000.0);
        assert!(profile.min_power <= min0);
        assert!(profile.max_power >= max0);

        // A much larger observation stretches the top, not the bottom
        reinforce_profile(&mut profile, 2500.0);
        assert!(profile.max_power >= 2500.0 * 1.3 - 1e-9);
        assert!(profile.min_power <= min0);
        assert!(profile.min_power <= profile.max_power);
    }

    #[test]
    fn bootstrap_invariants() {
        let profile = bootstrap_profile("Heat Pump", -950.0);

        assert_eq!(profile.learning_count, 1);
        assert!((profile.typical_power - 950.0).abs() < 1e-9);
        assert!(profile.power_variance > 0.0);
        assert!(profile.min_power <= profile.max_power);
        assert!((profile.min_power - 665.0).abs() < 1e-9);
        assert!((profile.max_power - 1235.0).abs() < 1e-9);
    }
}
