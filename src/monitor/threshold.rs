//! Threshold evaluation for one monitoring tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{MetricType, Severity};

/// Alerting limits. A value at or above a limit breaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub packet_loss_warning_pct: f64,
    pub packet_loss_critical_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            latency_warning_ms: 100.0,
            latency_critical_ms: 200.0,
            packet_loss_warning_pct: 1.0,
            packet_loss_critical_pct: 5.0,
        }
    }
}

/// Everything measured for one target in one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSample {
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
    pub jitter_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdBreach {
    pub severity: Severity,
    pub metric_type: MetricType,
    pub message: String,
}

/// Check latency and packet loss independently; at most one breach per metric.
pub fn evaluate(thresholds: &Thresholds, sample: &NetworkSample) -> Vec<ThresholdBreach> {
    let mut breaches = Vec::with_capacity(2);

    if let Some(severity) = level(
        sample.latency_ms,
        thresholds.latency_warning_ms,
        thresholds.latency_critical_ms,
    ) {
        breaches.push(ThresholdBreach {
            severity,
            metric_type: MetricType::Latency,
            message: format!(
                "{}: Latency {:.2}ms exceeds {} threshold",
                sample.target,
                sample.latency_ms,
                label(severity)
            ),
        });
    }

    if let Some(severity) = level(
        sample.packet_loss_pct,
        thresholds.packet_loss_warning_pct,
        thresholds.packet_loss_critical_pct,
    ) {
        breaches.push(ThresholdBreach {
            severity,
            metric_type: MetricType::PacketLoss,
            message: format!(
                "{}: Packet loss {:.2}% exceeds {} threshold",
                sample.target,
                sample.packet_loss_pct,
                label(severity)
            ),
        });
    }

    breaches
}

fn level(value: f64, warning: f64, critical: f64) -> Option<Severity> {
    if value >= critical {
        Some(Severity::Critical)
    } else if value >= warning {
        Some(Severity::Warning)
    } else {
        None
    }
}

fn label(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        _ => "warning",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(latency_ms: f64, packet_loss_pct: f64) -> NetworkSample {
        NetworkSample {
            timestamp: Utc::now(),
            target: "Google DNS".to_string(),
            latency_ms,
            packet_loss_pct,
            jitter_ms: 0.0,
        }
    }

    #[test]
    fn test_within_limits() {
        assert!(evaluate(&Thresholds::default(), &sample(20.0, 0.0)).is_empty());
        assert!(evaluate(&Thresholds::default(), &sample(99.99, 0.99)).is_empty());
    }

    #[test]
    fn test_latency_levels() {
        let warning = evaluate(&Thresholds::default(), &sample(150.0, 0.0));
        assert_eq!(
            warning,
            vec![ThresholdBreach {
                severity: Severity::Warning,
                metric_type: MetricType::Latency,
                message: "Google DNS: Latency 150.00ms exceeds warning threshold".to_string(),
            }]
        );

        let critical = evaluate(&Thresholds::default(), &sample(250.0, 0.0));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].severity, Severity::Critical);
        assert_eq!(critical[0].message, "Google DNS: Latency 250.00ms exceeds critical threshold");
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let t = Thresholds::default();
        assert_eq!(evaluate(&t, &sample(100.0, 0.0))[0].severity, Severity::Warning);
        assert_eq!(evaluate(&t, &sample(200.0, 0.0))[0].severity, Severity::Critical);
        assert_eq!(evaluate(&t, &sample(0.0, 1.0))[0].severity, Severity::Warning);
        assert_eq!(evaluate(&t, &sample(0.0, 5.0))[0].severity, Severity::Critical);
    }

    #[test]
    fn test_metrics_evaluated_independently() {
        let breaches = evaluate(&Thresholds::default(), &sample(120.0, 100.0));
        assert_eq!(breaches.len(), 2);
        assert_eq!(breaches[0].metric_type, MetricType::Latency);
        assert_eq!(breaches[0].severity, Severity::Warning);
        assert_eq!(breaches[1].metric_type, MetricType::PacketLoss);
        assert_eq!(breaches[1].severity, Severity::Critical);
        assert_eq!(
            breaches[1].message,
            "Google DNS: Packet loss 100.00% exceeds critical threshold"
        );
    }

    #[test]
    fn test_thresholds_partial_json() {
        let t: Thresholds = serde_json::from_str(r#"{"latency_warning_ms": 50}"#).unwrap();
        assert_eq!(t.latency_warning_ms, 50.0);
        assert_eq!(t.latency_critical_ms, 200.0);
        assert_eq!(t.packet_loss_critical_pct, 5.0);
    }
}
