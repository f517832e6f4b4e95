//! Statistical helpers for the detection pipeline and reporting

use serde::{Deserialize, Serialize};

/// Summary of a power series, used by the statistics surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticalSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation. The detection windows are complete
/// populations of the tail being judged, not samples of a larger series.
pub fn population_std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

pub fn summarize(data: &[f64]) -> StatisticalSummary {
    if data.is_empty() {
        return StatisticalSummary::default();
    }

    let min = data.iter().copied().fold(f64::MAX, f64::min);
    let max = data.iter().copied().fold(f64::MIN, f64::max);

    StatisticalSummary {
        count: data.len(),
        mean: mean(data),
        std_dev: population_std_dev(data),
        min,
        max,
        range: max - min,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_std_dev() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&data) - 5.0).abs() < 1e-9);
        assert!((population_std_dev(&data) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(population_std_dev(&[]), 0.0);
        assert_eq!(population_std_dev(&[42.0]), 0.0);
    }

    #[test]
    fn summary_fields() {
        let summary = summarize(&[1.0, 3.0, 5.0]);
        assert_eq!(summary.count, 3);
        assert!((summary.mean - 3.0).abs() < 1e-9);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.range, 4.0);
    }
}
