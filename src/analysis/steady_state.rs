//! Steady-state detection

use super::population_std_dev;

/// Decides whether a power series has settled into a stable operating
/// regime. Appliance loads sit on low-variance plateaus between switching
/// events, so a low-variance tail means no transition is in progress.
pub struct SteadyStateDetector {
    sample_count: usize,
    threshold: f64,
}

impl SteadyStateDetector {
    pub fn new(sample_count: usize, threshold: f64) -> Self {
        Self { sample_count, threshold }
    }

    /// True when the last `sample_count` readings vary by less than the
    /// standard-deviation threshold. A single-sample tail has deviation 0
    /// and is trivially steady; fewer samples than required is not steady.
    pub fn is_steady(&self, powers: &[f64]) -> bool {
        if powers.len() < self.sample_count {
            return false;
        }

        let tail = &powers[powers.len() - self.sample_count..];
        let std_dev = if tail.len() > 1 { population_std_dev(tail) } else { 0.0 };
        std_dev < self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_power_is_steady() {
        let detector = SteadyStateDetector::new(5, 5.0);
        let powers = vec![200.0; 12];
        assert!(detector.is_steady(&powers));
    }

    #[test]
    fn alternating_power_is_not_steady() {
        let detector = SteadyStateDetector::new(5, 5.0);
        let powers: Vec<f64> = (0..12).map(|i| if i % 2 == 0 { 200.0 } else { 240.0 }).collect();
        assert!(!detector.is_steady(&powers));
    }

    #[test]
    fn insufficient_history_is_not_steady() {
        let detector = SteadyStateDetector::new(5, 5.0);
        assert!(!detector.is_steady(&[200.0, 200.0, 200.0]));
        assert!(!detector.is_steady(&[]));
    }

    #[test]
    fn small_jitter_below_threshold_is_steady() {
        let detector = SteadyStateDetector::new(5, 5.0);
        let powers = vec![200.0, 201.5, 199.0, 200.5, 199.5, 200.2];
        assert!(detector.is_steady(&powers));
    }
}
