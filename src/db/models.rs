//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A monitored host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Target {
    pub fn new(host: &str, name: &str) -> Self {
        Self {
            host: host.to_string(),
            name: name.to_string(),
            enabled: true,
        }
    }
}

/// Kind of a persisted measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Latency,
    PacketLoss,
    Jitter,
}

impl MetricType {
    pub const ALL: [MetricType; 3] = [MetricType::Latency, MetricType::PacketLoss, MetricType::Jitter];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Latency => "latency",
            MetricType::PacketLoss => "packet_loss",
            MetricType::Jitter => "jitter",
        }
    }

    /// Unit stored alongside values of this type.
    pub fn unit(&self) -> &'static str {
        match self {
            MetricType::Latency | MetricType::Jitter => "ms",
            MetricType::PacketLoss => "percent",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latency" => Ok(MetricType::Latency),
            "packet_loss" => Ok(MetricType::PacketLoss),
            "jitter" => Ok(MetricType::Jitter),
            other => Err(format!("unknown metric type: {}", other)),
        }
    }
}

/// A single persisted measurement row.
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: String,
}

impl Metric {
    /// Build an unsaved metric; the unit follows from the metric type.
    pub fn new(timestamp: DateTime<Utc>, target: &str, metric_type: MetricType, value: f64) -> Self {
        Self {
            id: 0,
            timestamp,
            target: target.to_string(),
            metric_type,
            value,
            unit: metric_type.unit().to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlertError {
    #[error("invalid severity level: {0}")]
    InvalidSeverity(String),
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(AlertError::InvalidSeverity(s.to_string())),
        }
    }
}

/// A persisted alert row.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub target: Option<String>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// An alert about to be written. Alerts always start unacknowledged.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub target: Option<String>,
}

/// Aggregate statistics for one metric type over a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub samples: i64,
}

/// Rows removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub metrics_deleted: usize,
    pub alerts_deleted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse() {
        assert_eq!("WARNING".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!("critical".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!(
            "PANIC".parse::<Severity>(),
            Err(AlertError::InvalidSeverity("PANIC".to_string()))
        );
    }

    #[test]
    fn test_metric_units() {
        let m = Metric::new(Utc::now(), "Google DNS", MetricType::PacketLoss, 1.5);
        assert_eq!(m.unit, "percent");
        assert_eq!(MetricType::Jitter.unit(), "ms");
        assert_eq!("packet_loss".parse::<MetricType>(), Ok(MetricType::PacketLoss));
    }
}
