// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! Appliance matching and confidence scoring

use serde::{Deserialize, Serialize};

use crate::appliances::{ApplianceProfile, OnOff, StateTracker};
use crate::config::DetectionConfig;

use super::PowerEvent;

/// How the observed transition squares with the appliance's tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionFit {
    /// Off appliance turning on, or on appliance turning off
    Valid,
    /// Double-on or double-off; halves the running confidence
    Implausible,
}

/// Per-term breakdown of one candidate's score. Scoring is a pure
/// function of profile, event, and tracked state, so every accepted or
/// rejected match can be explained after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchScore {
    /// Power-fit contribution before weighting, when the magnitude fell
    /// inside the profile's [min, max] envelope
    pub power_fit: Option<f64>,
    pub power_factor_match: bool,
    pub transition: TransitionFit,
    pub learning_bonus: f64,
    pub total: f64,
}

impl MatchScore {
    /// Human-readable contributing reasons, mirroring the score terms.
    pub fn reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if let Some(fit) = self.power_fit {
            reasons.push(format!("Power match: {:.2}", fit));
        }
        if self.power_factor_match {
            reasons.push("Power factor match".to_string());
        }
        match self.transition {
            TransitionFit::Valid => reasons.push("Valid state transition".to_string()),
            TransitionFit::Implausible => reasons.push("Implausible state transition".to_string()),
        }
        if self.learning_bonus > 0.0 {
            reasons.push(format!("Learning bonus: {:.2}", self.learning_bonus));
        }
        reasons
    }
}

/// An accepted (or candidate) identification for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub appliance_name: String,
    pub confidence: f64,
    pub power_consumption: f64,
    pub score: MatchScore,
}

/// Scores every known profile against a detected event and returns the
/// best candidate above the acceptance floor, or none.
pub struct ApplianceMatcher {
    candidate_floor: f64,
    acceptance_floor: f64,
}

impl ApplianceMatcher {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            candidate_floor: config.candidate_floor,
            acceptance_floor: config.acceptance_floor,
        }
    }

    /// Scores one profile against an event. Pure: no state is touched.
    pub fn score(
        &self,
        profile: &ApplianceProfile,
        power_change: f64,
        power_factor: Option<f64>,
        current_state: OnOff,
    ) -> MatchScore {
        let magnitude = power_change.abs();
        let mut confidence = 0.0;

        // Power fit: 60% weight, only inside the profile's envelope. A
        // zero variance contributes nothing rather than dividing by zero.
        let power_fit = if profile.min_power <= magnitude && magnitude <= profile.max_power {
            let fit = if profile.power_variance > 0.0 {
                let power_diff = (magnitude - profile.typical_power).abs();
                (1.0 - power_diff / profile.power_variance).max(0.0)
            } else {
                0.0
            };
            confidence += fit * 0.6;
            Some(fit)
        } else {
            None
        };

        // Power factor: 20% weight when supplied and inside the declared
        // range; missing data is never penalized.
        let power_factor_match = match (power_factor, profile.power_factor_range) {
            (Some(pf), Some(range)) if range.contains(pf) => {
                confidence += 0.2;
                true
            }
            _ => false,
        };

        // Transition validity: 10% weight for a plausible on/off flip,
        // halved confidence for a double-on or double-off.
        let turning_on = power_change > 0.0;
        let transition = match (turning_on, current_state) {
            (true, OnOff::Off) | (false, OnOff::On) => {
                confidence += 0.1;
                TransitionFit::Valid
            }
            _ => {
                confidence *= 0.5;
                TransitionFit::Implausible
            }
        };

        // Frequently-confirmed appliances earn a capped bonus
        let learning_bonus = (profile.learning_count as f64 * 0.01).min(0.1);
        confidence += learning_bonus;

        MatchScore {
            power_fit,
            power_factor_match,
            transition,
            learning_bonus,
            total: confidence,
        }
    }

    /// All profiles clearing the candidate floor, best first. Profiles are
    /// considered in descending `learning_count` so more-observed
    /// appliances win ties.
    pub fn candidates(
        &self,
        event: &PowerEvent,
        profiles: &[ApplianceProfile],
        states: &StateTracker,
    ) -> Vec<MatchResult> {
        let mut ordered: Vec<&ApplianceProfile> = profiles.iter().collect();
        ordered.sort_by(|a, b| b.learning_count.cmp(&a.learning_count));

        let mut matches: Vec<MatchResult> = ordered
            .into_iter()
            .filter_map(|profile| {
                let state = states.get(&profile.name).state;
                let score = self.score(profile, event.power_change, event.power_factor, state);

                (score.total > self.candidate_floor).then(|| MatchResult {
                    appliance_name: profile.name.clone(),
                    confidence: score.total.min(1.0),
                    power_consumption: event.power_change.abs(),
                    score,
                })
            })
            .collect();

        // Stable sort preserves the learning-count ordering on ties
        matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        matches
    }

    /// The best candidate above the acceptance floor. The two floors are
    /// deliberately distinct: candidates surface near-misses for
    /// diagnostics, acceptance commits a state change.
    pub fn best_match(
        &self,
        event: &PowerEvent,
        profiles: &[ApplianceProfile],
        states: &StateTracker,
    ) -> Option<MatchResult> {
        self.candidates(event, profiles, states)
            .into_iter()
            .next()
            .filter(|m| m.confidence > self.acceptance_floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appliances::{seed_catalogue, PowerFactorRange};
    use chrono::Utc;

    fn event(power_change: f64, power_factor: Option<f64>) -> PowerEvent {
        PowerEvent {
            detected_at: Utc::now(),
            kind: PowerEvent::kind_of(power_change),
            power_before: 200.0,
            power_after: 200.0 + power_change,
            power_change,
            transient_magnitude: power_change.abs(),
            was_steady_before: true,
            confidence: 1.0,
            voltage: None,
            current: None,
            power_factor,
            identified: false,
        }
    }

    fn matcher() -> ApplianceMatcher {
        ApplianceMatcher::new(&crate::config::DetectionConfig::default())
    }

    fn profile(name: &str, typical: f64, min: f64, max: f64, variance: f64) -> ApplianceProfile {
        let mut p = ApplianceProfile::with_typical_power(name, typical, 60);
        p.min_power = min;
        p.max_power = max;
        p.power_variance = variance;
        p
    }

    #[test]
    fn near_typical_power_is_accepted() {
        let profiles = vec![profile("Microwave", 1100.0, 800.0, 1500.0, 200.0)];
        let states = StateTracker::new();

        let result = matcher()
            .best_match(&event(1120.0, None), &profiles, &states)
            .expect("accepted match");

        assert_eq!(result.appliance_name, "Microwave");
        assert!(result.confidence >= 0.4);
        assert!((result.power_consumption - 1120.0).abs() < 1e-9);
        assert!(result.score.power_fit.is_some());
    }

    #[test]
    fn out_of_envelope_power_contributes_nothing() {
        let m = matcher();
        let p = profile("Microwave", 1100.0, 800.0, 1500.0, 200.0);

        let score = m.score(&p, 300.0, None, OnOff::Off);
        assert!(score.power_fit.is_none());
        // Only the valid-transition term remains
        assert!((score.total - 0.1).abs() < 1e-9);
    }

    #[test]
    fn zero_variance_short_circuits() {
        let m = matcher();
        let p = profile("Degenerate", 1000.0, 800.0, 1200.0, 0.0);

        let score = m.score(&p, 1000.0, None, OnOff::Off);
        assert_eq!(score.power_fit, Some(0.0));
        assert!((score.total - 0.1).abs() < 1e-9);
    }

    #[test]
    fn double_on_is_penalized() {
        let m = matcher();
        let p = profile("Kettle", 1500.0, 1200.0, 1800.0, 200.0);
        let states = StateTracker::new();

        let off_score = m.score(&p, 1500.0, None, OnOff::Off);
        states.set("Kettle", OnOff::On, 1500.0, 0.9);
        let on_score = m.score(&p, 1500.0, None, states.get("Kettle").state);

        assert_eq!(on_score.transition, TransitionFit::Implausible);
        assert!(on_score.total < off_score.total);
        // Halving applies to the accumulated terms, the 0.1 is never added
        assert!((on_score.total - off_score.total / 2.0).abs() < 0.06);
    }

    #[test]
    fn power_factor_inside_range_adds_weight() {
        let m = matcher();
        let mut p = profile("Toaster", 1300.0, 1000.0, 1500.0, 200.0);
        p.power_factor_range = Some(PowerFactorRange::new(0.95, 0.99));

        let with_pf = m.score(&p, 1300.0, Some(0.97), OnOff::Off);
        let without_pf = m.score(&p, 1300.0, None, OnOff::Off);
        let outside_pf = m.score(&p, 1300.0, Some(0.70), OnOff::Off);

        assert!(with_pf.power_factor_match);
        assert!((with_pf.total - without_pf.total - 0.2).abs() < 1e-9);
        // Missing or out-of-range power factor is not penalized
        assert!((without_pf.total - outside_pf.total).abs() < 1e-9);
    }

    #[test]
    fn ties_prefer_more_observed_appliances() {
        let mut a = profile("Heater A", 1000.0, 700.0, 1300.0, 200.0);
        let mut b = profile("Heater B", 1000.0, 700.0, 1300.0, 200.0);
        a.learning_count = 3;
        b.learning_count = 3;
        // Identical counts: catalogue order decides via the stable sort
        let states = StateTracker::new();
        let candidates = matcher().candidates(&event(1000.0, None), &[a, b], &states);
        assert_eq!(candidates[0].appliance_name, "Heater A");

        let mut c = profile("Heater C", 1000.0, 700.0, 1300.0, 200.0);
        let mut d = profile("Heater D", 1000.0, 700.0, 1300.0, 200.0);
        c.learning_count = 1;
        d.learning_count = 6;
        let candidates = matcher().candidates(&event(1000.0, None), &[c, d], &states);
        // Higher learning_count is scored first AND earns the larger bonus
        assert_eq!(candidates[0].appliance_name, "Heater D");
    }

    #[test]
    fn below_acceptance_floor_is_no_match() {
        // 120W off typical with 200W variance: fit 0.4, total 0.34 —
        // above the candidate floor, under the acceptance floor
        let profiles = vec![profile("Vague", 1000.0, 100.0, 2000.0, 200.0)];
        let states = StateTracker::new();
        let m = matcher();

        let result = m.best_match(&event(1120.0, None), &profiles, &states);
        assert!(result.is_none());

        // ...but it can still surface as a diagnostic candidate
        let candidates = m.candidates(&event(1120.0, None), &profiles, &states);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].confidence <= 0.4);
        assert!(candidates[0].confidence > 0.3);
    }

    #[test]
    fn off_event_matches_running_appliance() {
        let profiles = seed_catalogue();
        let states = StateTracker::new();
        states.set("Microwave", OnOff::On, 1100.0, 0.9);

        let result = matcher()
            .best_match(&event(-1080.0, Some(0.85)), &profiles, &states)
            .expect("match");

        assert_eq!(result.appliance_name, "Microwave");
        assert_eq!(result.score.transition, TransitionFit::Valid);
    }

    #[test]
    fn confidence_stays_bounded() {
        let mut p = profile("Maxed", 1000.0, 700.0, 1300.0, 200.0);
        p.learning_count = 100;
        p.power_factor_range = Some(PowerFactorRange::new(0.0, 1.0));
        let states = StateTracker::new();

        let candidates = matcher().candidates(&event(1000.0, Some(0.9)), &[p], &states);
        assert!(candidates[0].confidence <= 1.0);
    }
}
