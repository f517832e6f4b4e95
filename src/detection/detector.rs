// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! Load-change event detection state machine

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::analysis::{mean, SampleWindow, SteadyStateDetector, TransientDetector};
use crate::config::DetectionConfig;
use crate::meter::Sample;

use super::{EventKind, PowerEvent};

/// Signal flags computed over the history as it stood before a sample was
/// appended; stored alongside the raw reading.
#[derive(Debug, Clone, Copy)]
pub struct SignalFlags {
    pub steady_state: bool,
    pub transient_detected: bool,
}

/// Consumes one sample at a time and decides whether a load-change event
/// just occurred.
///
/// State machine per sample: append to the window; require `window_size`
/// of history; judge steadiness of the pre-disturbance region; scan the
/// tail for a sharp step; compare the current power against the baseline;
/// fire when the change clears the threshold, a transient is present, and
/// the debounce interval has elapsed.
pub struct EventDetector {
    config: DetectionConfig,
    window: SampleWindow,
    steady: SteadyStateDetector,
    transient: TransientDetector,
    last_event_time: Option<DateTime<Utc>>,
    last_steady_power: f64,
}

impl EventDetector {
    pub fn new(config: DetectionConfig) -> Self {
        let window = SampleWindow::new(config.power_history_size);
        let steady = SteadyStateDetector::new(config.steady_state_samples, config.std_dev_threshold);
        let transient = TransientDetector::new(config.transient_window, config.power_threshold);

        Self {
            config,
            window,
            steady,
            transient,
            last_event_time: None,
            last_steady_power: 0.0,
        }
    }

    /// Steady/transient flags over the history before the next append.
    pub fn signal_flags(&self) -> SignalFlags {
        let powers = self.window.powers();
        SignalFlags {
            steady_state: self.steady.is_steady(&powers),
            transient_detected: self.transient.detect(&powers).detected,
        }
    }

    /// Feed one sample through the state machine. `None` is the normal
    /// outcome: insufficient history, no qualifying step, or debounced.
    pub fn observe(&mut self, sample: &Sample) -> Option<PowerEvent> {
        let current_power = sample.power;
        self.window.append(sample);

        if self.window.len() < self.config.window_size {
            return None;
        }

        // Steadiness of the "before" period, not including the disturbance
        let before = self.window.excluding_tail(self.config.transient_detection_window);
        let was_steady = self.steady.is_steady(&before);

        let scan = self.transient.detect(&self.window.powers());

        // Baseline: mean of the steady plateau, or the previous reading
        // when no stable baseline exists.
        let baseline = if was_steady {
            mean(&before)
        } else {
            self.window.power_back(1).unwrap_or(current_power)
        };
        let power_change = current_power - baseline;

        if power_change.abs() <= self.config.power_threshold || !scan.detected {
            return None;
        }

        if let Some(last) = self.last_event_time {
            let elapsed = sample.timestamp.signed_duration_since(last);
            if elapsed <= Duration::seconds(self.config.min_event_interval_secs) {
                debug!("Suppressed event within debounce interval ({:.1}W change)", power_change);
                return None;
            }
        }

        let confidence = event_confidence(power_change, scan.detected, was_steady);

        self.last_event_time = Some(sample.timestamp);
        self.last_steady_power = current_power;

        Some(PowerEvent {
            detected_at: sample.timestamp,
            kind: PowerEvent::kind_of(power_change),
            power_before: baseline,
            power_after: current_power,
            power_change,
            transient_magnitude: scan.max_change,
            was_steady_before: was_steady,
            confidence,
            voltage: sample.voltage,
            current: sample.current,
            power_factor: sample.power_factor,
            identified: false,
        })
    }

    pub fn current_power(&self) -> Option<f64> {
        self.window.last_power()
    }

    pub fn history_len(&self) -> usize {
        self.window.len()
    }

    pub fn recent_powers(&self, k: usize) -> Vec<f64> {
        self.window.recent(k)
    }

    pub fn last_steady_power(&self) -> f64 {
        self.last_steady_power
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.last_event_time = None;
        self.last_steady_power = 0.0;
    }
}

/// Deterministic event confidence: large, clean, well-isolated steps score
/// highest. Always in [0, 1].
fn event_confidence(power_change: f64, has_transient: bool, was_steady: bool) -> f64 {
    let mut confidence: f64 = 0.5;

    if power_change.abs() > 100.0 {
        confidence += 0.2;
    } else if power_change.abs() > 50.0 {
        confidence += 0.1;
    }

    if has_transient {
        confidence += 0.2;
    }

    if was_steady {
        confidence += 0.1;
    }

    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_at(power: f64, secs: i64) -> Sample {
        let mut sample = Sample::new(power);
        sample.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        sample
    }

    fn detector() -> EventDetector {
        EventDetector::new(DetectionConfig::default())
    }

    #[test]
    fn steady_baseline_then_step_fires_event() {
        let mut det = detector();

        for i in 0..15 {
            assert!(det.observe(&sample_at(200.0, i)).is_none());
        }

        let event = det.observe(&sample_at(1100.0, 15)).expect("event");
        assert_eq!(event.kind, EventKind::On);
        assert!(event.was_steady_before);
        assert!((event.power_change - 900.0).abs() < 1.0);
        assert!((event.power_before - 200.0).abs() < 1.0);
        assert_eq!(event.power_after, 1100.0);
        assert!((event.confidence - 1.0).abs() < 1e-9);
        assert!(!event.identified);
    }

    #[test]
    fn small_fluctuations_never_fire() {
        let mut det = detector();

        // 10W of jitter around a 200W baseline stays under the 30W threshold
        for i in 0..120 {
            let jitter = if i % 2 == 0 { 5.0 } else { -5.0 };
            assert!(det.observe(&sample_at(200.0 + jitter, i)).is_none());
        }
    }

    #[test]
    fn debounce_collapses_double_fire() {
        let mut det = detector();

        for i in 0..15 {
            det.observe(&sample_at(200.0, i));
        }

        let first = det.observe(&sample_at(1100.0, 15));
        assert!(first.is_some());

        // A second qualifying step one second later is inside the interval
        let second = det.observe(&sample_at(2100.0, 16));
        assert!(second.is_none());

        // Well past the interval, events fire again
        let third = det.observe(&sample_at(3200.0, 25));
        assert!(third.is_some());
    }

    #[test]
    fn insufficient_history_is_silent() {
        let mut det = detector();

        for i in 0..10 {
            assert!(det.observe(&sample_at(200.0 + i as f64 * 500.0, i)).is_none());
        }
    }

    #[test]
    fn off_event_has_negative_change() {
        let mut det = detector();

        for i in 0..15 {
            det.observe(&sample_at(1300.0, i));
        }

        let event = det.observe(&sample_at(200.0, 15)).expect("event");
        assert_eq!(event.kind, EventKind::Off);
        assert!(event.power_change < 0.0);
    }

    #[test]
    fn confidence_always_bounded() {
        for &change in &[0.0, 20.0, 60.0, 150.0, -800.0, 1e6] {
            for &transient in &[true, false] {
                for &steady in &[true, false] {
                    let c = event_confidence(change, transient, steady);
                    assert!((0.0..=1.0).contains(&c));
                }
            }
        }
    }

    #[test]
    fn non_steady_baseline_falls_back_to_previous_sample() {
        let mut det = detector();

        // Noisy ramp: never steady, so the baseline is the prior reading
        let mut power = 100.0;
        for i in 0..15 {
            power += if i % 2 == 0 { 20.0 } else { -12.0 };
            det.observe(&sample_at(power, i));
        }

        let event = det.observe(&sample_at(power + 500.0, 15)).expect("event");
        assert!(!event.was_steady_before);
        assert!((event.power_before - power).abs() < 1e-9);
        assert!((event.power_change - 500.0).abs() < 1e-9);
    }
}
