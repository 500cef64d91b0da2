//! Rolling latency baseline, anomaly and trend detection for one target.

use serde::Serialize;
use std::fmt;

use super::stats;

/// Values needed before a baseline (and so anomaly detection) exists.
pub const MIN_BASELINE_SAMPLES: usize = 10;

/// Relative change between window halves that counts as a trend, in percent.
const TREND_THRESHOLD_PCT: f64 = 10.0;

/// Direction of recent latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// History of one target's latency values.
///
/// The buffer grows to twice `baseline_samples` and is then cut back to the
/// newest `baseline_samples`, so trims stay rare.
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    baseline_samples: usize,
    measurements: Vec<f64>,
}

impl TrendAnalyzer {
    pub fn new(baseline_samples: usize) -> Self {
        let baseline_samples = baseline_samples.max(1);
        Self {
            baseline_samples,
            measurements: Vec::with_capacity(baseline_samples * 2 + 1),
        }
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn add_measurement(&mut self, latency: f64) {
        self.measurements.push(latency);
        if self.measurements.len() > self.baseline_samples * 2 {
            let excess = self.measurements.len() - self.baseline_samples;
            self.measurements.drain(..excess);
        }
    }

    /// The newest `baseline_samples` values.
    fn window(&self) -> &[f64] {
        let start = self.measurements.len().saturating_sub(self.baseline_samples);
        &self.measurements[start..]
    }

    /// Median of the recent window, once enough values were recorded.
    pub fn baseline(&self) -> Option<f64> {
        if self.measurements.len() < MIN_BASELINE_SAMPLES {
            return None;
        }
        stats::median(self.window())
    }

    /// Whether `latency` exceeds the baseline by more than `multiplier` standard deviations.
    pub fn detect_anomaly(&self, latency: f64, multiplier: f64) -> bool {
        let Some(baseline) = self.baseline() else {
            return false;
        };

        let window = self.window();
        if window.len() < MIN_BASELINE_SAMPLES {
            return false;
        }
        let Some(stddev) = stats::sample_stddev(window) else {
            return false;
        };

        let threshold = baseline + stddev * multiplier;
        let anomalous = latency > threshold;
        if anomalous {
            tracing::warn!(
                "Anomalous latency detected: {:.2}ms (baseline: {:.2}ms, threshold: {:.2}ms)",
                latency,
                baseline,
                threshold
            );
        }
        anomalous
    }

    /// Compare the older and newer halves of the last `window_size` values.
    pub fn trend(&self, window_size: usize) -> Trend {
        if window_size < 2 || self.measurements.len() < window_size {
            return Trend::InsufficientData;
        }

        let recent = &self.measurements[self.measurements.len() - window_size..];
        let (older, newer) = recent.split_at(window_size / 2);
        let (Some(avg_older), Some(avg_newer)) = (stats::mean(older), stats::mean(newer)) else {
            return Trend::InsufficientData;
        };

        if avg_older == 0.0 {
            return if avg_newer > 0.0 { Trend::Increasing } else { Trend::Stable };
        }

        let change_pct = (avg_newer - avg_older) / avg_older * 100.0;
        if change_pct > TREND_THRESHOLD_PCT {
            Trend::Increasing
        } else if change_pct < -TREND_THRESHOLD_PCT {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(baseline_samples: usize, values: impl IntoIterator<Item = f64>) -> TrendAnalyzer {
        let mut analyzer = TrendAnalyzer::new(baseline_samples);
        for v in values {
            analyzer.add_measurement(v);
        }
        analyzer
    }

    #[test]
    fn test_baseline_needs_ten_values() {
        let analyzer = filled(20, [10.0; 9]);
        assert_eq!(analyzer.baseline(), None);
        assert!(!analyzer.detect_anomaly(1000.0, 2.0));

        let analyzer = filled(20, [10.0; 10]);
        assert_eq!(analyzer.baseline(), Some(10.0));
        assert!(!analyzer.detect_anomaly(10.0, 2.0));
    }

    #[test]
    fn test_baseline_is_median_of_window() {
        let analyzer = filled(20, (0..20).map(|i| 10.0 + i as f64 * 0.5));
        let baseline = analyzer.baseline().unwrap();
        assert!((10.0..=20.0).contains(&baseline));
        assert!((baseline - 14.75).abs() < 1e-9);
    }

    #[test]
    fn test_trim_keeps_newest() {
        let analyzer = filled(10, (0..21).map(f64::from));
        // 21 > 2 * 10 triggers a trim back to the newest 10
        assert_eq!(analyzer.len(), 10);
        assert_eq!(analyzer.baseline(), Some(15.5));

        let analyzer = filled(10, (0..20).map(f64::from));
        assert_eq!(analyzer.len(), 20);
    }

    #[test]
    fn test_outlier_flagged() {
        let mut analyzer = TrendAnalyzer::new(20);
        for i in 0..50 {
            analyzer.add_measurement(10.0 + (i % 3) as f64 * 0.2);
        }
        assert!(!analyzer.detect_anomaly(10.3, 2.0));
        assert!(analyzer.detect_anomaly(100.0, 2.0));
    }

    #[test]
    fn test_constant_history_flags_any_increase() {
        let analyzer = filled(100, [10.0; 50]);
        assert!(!analyzer.detect_anomaly(10.0, 2.0));
        assert!(analyzer.detect_anomaly(100.0, 2.0));
    }

    #[test]
    fn test_trend_directions() {
        assert_eq!(filled(100, [10.0; 30]).trend(20), Trend::Stable);
        assert_eq!(
            filled(100, (0..30).map(|i| 10.0 + i as f64 * 2.0)).trend(20),
            Trend::Increasing
        );
        assert_eq!(
            filled(100, (0..30).map(|i| 100.0 - i as f64 * 2.0)).trend(20),
            Trend::Decreasing
        );
    }

    #[test]
    fn test_trend_insufficient_data() {
        assert_eq!(filled(100, [10.0; 19]).trend(20), Trend::InsufficientData);
        assert_eq!(filled(100, [10.0; 5]).trend(1), Trend::InsufficientData);
        assert_eq!(Trend::InsufficientData.to_string(), "insufficient_data");
    }

    #[test]
    fn test_trend_from_zero() {
        let mut analyzer = filled(100, [0.0; 10]);
        assert_eq!(analyzer.trend(20), Trend::InsufficientData);
        for _ in 0..10 {
            analyzer.add_measurement(5.0);
        }
        assert_eq!(analyzer.trend(20), Trend::Increasing);
        assert_eq!(filled(100, [0.0; 20]).trend(20), Trend::Stable);
    }
}
