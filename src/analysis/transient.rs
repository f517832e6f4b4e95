//! Transient detection

/// Detects the sharp power step that accompanies an appliance switching on
/// or off.
pub struct TransientDetector {
    window: usize,
    threshold: f64,
}

/// Outcome of a transient scan: whether a qualifying step was found and the
/// largest absolute successive difference observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransientScan {
    pub detected: bool,
    pub max_change: f64,
}

impl TransientDetector {
    pub fn new(window: usize, threshold: f64) -> Self {
        Self { window, threshold }
    }

    /// Scans the last `window` readings for a single sharp step. A run of
    /// small steps each under the threshold is not flagged even if their sum
    /// is large; cumulative drift is deliberately invisible here.
    pub fn detect(&self, powers: &[f64]) -> TransientScan {
        if powers.len() < self.window {
            return TransientScan { detected: false, max_change: 0.0 };
        }

        let recent = &powers[powers.len() - self.window..];
        if recent.len() < 2 {
            return TransientScan { detected: false, max_change: 0.0 };
        }

        let max_change = recent
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .fold(0.0_f64, f64::max);

        TransientScan {
            detected: max_change > self.threshold,
            max_change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharp_step_is_flagged() {
        let detector = TransientDetector::new(5, 30.0);
        let powers = vec![200.0, 200.0, 201.0, 200.0, 1100.0];

        let scan = detector.detect(&powers);
        assert!(scan.detected);
        assert!((scan.max_change - 900.0).abs() < 1.0);
    }

    #[test]
    fn gradual_drift_is_not_flagged() {
        let detector = TransientDetector::new(5, 30.0);
        // 100W of total drift, but no single step above 25W
        let powers = vec![200.0, 225.0, 250.0, 275.0, 300.0];

        let scan = detector.detect(&powers);
        assert!(!scan.detected);
        assert!((scan.max_change - 25.0).abs() < 1e-9);
    }

    #[test]
    fn insufficient_history_yields_zero() {
        let detector = TransientDetector::new(5, 30.0);
        let scan = detector.detect(&[200.0, 900.0]);
        assert!(!scan.detected);
        assert_eq!(scan.max_change, 0.0);
    }
}
