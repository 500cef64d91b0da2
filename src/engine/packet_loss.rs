//! Packet loss analysis and quality classification.
//!
//! Loss is `(sent - received) / sent * 100`. A host that cannot be probed
//! at all counts as 100% loss.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::probe::ProbeAdapter;

/// Default per-packet timeout for loss probes.
pub const DEFAULT_LOSS_TIMEOUT: Duration = Duration::from_secs(2);

/// Full breakdown of a loss probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketLossResult {
    pub sent: u32,
    pub received: u32,
    pub loss_pct: f64,
    pub host: String,
}

/// Network quality tiers by packet loss (after ITU-T Y.1541).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LossQuality {
    Excellent,
    VeryGood,
    Good,
    Fair,
    Poor,
    Unacceptable,
}

impl LossQuality {
    pub fn classify(loss_pct: f64) -> Self {
        if loss_pct == 0.0 {
            LossQuality::Excellent
        } else if loss_pct < 0.1 {
            LossQuality::VeryGood
        } else if loss_pct < 1.0 {
            LossQuality::Good
        } else if loss_pct < 5.0 {
            LossQuality::Fair
        } else if loss_pct < 10.0 {
            LossQuality::Poor
        } else {
            LossQuality::Unacceptable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LossQuality::Excellent => "EXCELLENT",
            LossQuality::VeryGood => "VERY_GOOD",
            LossQuality::Good => "GOOD",
            LossQuality::Fair => "FAIR",
            LossQuality::Poor => "POOR",
            LossQuality::Unacceptable => "UNACCEPTABLE",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            LossQuality::Excellent => "No packet loss detected. Optimal network conditions.",
            LossQuality::VeryGood => "Minimal packet loss. Suitable for all applications.",
            LossQuality::Good => "Low packet loss. Acceptable for most applications.",
            LossQuality::Fair => "Moderate packet loss. May affect real-time applications.",
            LossQuality::Poor => "High packet loss. Significant impact on performance.",
            LossQuality::Unacceptable => "Severe packet loss. Network is not usable.",
        }
    }
}

impl fmt::Display for LossQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Packet loss measurements.
#[derive(Clone)]
pub struct PacketLossEngine {
    adapter: ProbeAdapter,
}

impl PacketLossEngine {
    pub fn new(adapter: ProbeAdapter) -> Self {
        Self { adapter }
    }

    /// Loss percentage over one `count`-packet probe, 100 when the probe fails.
    pub async fn analyze(&self, host: &str, count: u32, timeout: Duration) -> f64 {
        match self.adapter.probe(host, count, timeout).await {
            Ok(report) => match report.loss_pct() {
                Some(loss) => {
                    tracing::debug!("Packet loss to {}: {:.2}%", host, loss);
                    loss
                }
                None => {
                    tracing::warn!("Could not determine packet loss for {}", host);
                    100.0
                }
            },
            Err(_) => 100.0,
        }
    }

    /// Sent/received breakdown over `count` packets.
    ///
    /// `None` only when no sent count is available, not for high loss.
    pub async fn analyze_detailed(&self, host: &str, count: u32) -> Option<PacketLossResult> {
        let report = self.adapter.probe(host, count, DEFAULT_LOSS_TIMEOUT).await.ok()?;
        let Some(loss_pct) = report.loss_pct() else {
            tracing::error!("No packets sent to {}", host);
            return None;
        };

        tracing::info!(
            "Detailed packet loss for {}: {}/{} packets received ({:.2}% loss)",
            host,
            report.received,
            report.sent,
            loss_pct
        );
        Some(PacketLossResult {
            sent: report.sent,
            received: report.received,
            loss_pct,
            host: host.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, ProbeFuture, ProbeReport, Prober};
    use std::sync::Arc;

    struct Fixed(Result<ProbeReport, ProbeError>);

    impl Prober for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn probe<'a>(&'a self, _host: &'a str, _count: u32, _timeout: Duration) -> ProbeFuture<'a> {
            Box::pin(async move { self.0.clone() })
        }
    }

    fn engine(result: Result<ProbeReport, ProbeError>) -> PacketLossEngine {
        PacketLossEngine::new(ProbeAdapter::new(Arc::new(Fixed(result))))
    }

    fn report(sent: u32, received: u32) -> ProbeReport {
        ProbeReport {
            sent,
            received,
            rtts_ms: vec![1.0; received as usize],
        }
    }

    #[tokio::test]
    async fn test_analyze_unreachable_is_total_loss() {
        let unreachable = engine(Err(ProbeError::Command("ping: unknown host".to_string())));
        assert_eq!(
            unreachable.analyze("invalid.host.example", 3, Duration::from_secs(1)).await,
            100.0
        );
    }

    #[tokio::test]
    async fn test_analyze_partial_loss() {
        let lossy = engine(Ok(report(10, 7)));
        let loss = lossy.analyze("gw", 10, Duration::from_secs(1)).await;
        assert!((loss - 30.0).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&loss));
    }

    #[tokio::test]
    async fn test_analyze_detailed() {
        let result = engine(Ok(report(100, 98))).analyze_detailed("gw", 100).await.unwrap();
        assert_eq!(result.sent, 100);
        assert_eq!(result.received, 98);
        assert!((result.loss_pct - 2.0).abs() < 1e-9);
        assert_eq!(result.host, "gw");

        // High loss still has a breakdown
        let dead = engine(Ok(report(100, 0))).analyze_detailed("gw", 100).await.unwrap();
        assert_eq!(dead.loss_pct, 100.0);

        assert!(engine(Ok(report(0, 0))).analyze_detailed("gw", 100).await.is_none());
        assert!(engine(Err(ProbeError::Timeout(Duration::from_secs(1))))
            .analyze_detailed("gw", 100)
            .await
            .is_none());
    }

    #[test]
    fn test_classify_tiers() {
        assert_eq!(LossQuality::classify(0.0), LossQuality::Excellent);
        assert_eq!(LossQuality::classify(0.05), LossQuality::VeryGood);
        assert_eq!(LossQuality::classify(0.5), LossQuality::Good);
        assert_eq!(LossQuality::classify(2.0), LossQuality::Fair);
        assert_eq!(LossQuality::classify(7.0), LossQuality::Poor);
        assert_eq!(LossQuality::classify(15.0), LossQuality::Unacceptable);
    }

    #[test]
    fn test_classify_breakpoints() {
        assert_eq!(LossQuality::classify(0.099), LossQuality::VeryGood);
        assert_eq!(LossQuality::classify(0.1), LossQuality::Good);
        assert_eq!(LossQuality::classify(0.999), LossQuality::Good);
        assert_eq!(LossQuality::classify(1.0), LossQuality::Fair);
        assert_eq!(LossQuality::classify(4.999), LossQuality::Fair);
        assert_eq!(LossQuality::classify(5.0), LossQuality::Poor);
        assert_eq!(LossQuality::classify(9.999), LossQuality::Poor);
        assert_eq!(LossQuality::classify(10.0), LossQuality::Unacceptable);
        assert_eq!(LossQuality::classify(100.0), LossQuality::Unacceptable);
    }

    #[test]
    fn test_classify_monotonic() {
        let mut previous = LossQuality::classify(0.0);
        for step in 0..=2000 {
            let quality = LossQuality::classify(step as f64 * 0.01);
            assert!(quality >= previous, "quality improved at {}%", step as f64 * 0.01);
            previous = quality;
        }
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(LossQuality::VeryGood.to_string(), "VERY_GOOD");
        for quality in [
            LossQuality::Excellent,
            LossQuality::Good,
            LossQuality::Poor,
            LossQuality::Unacceptable,
        ] {
            assert!(!quality.description().is_empty());
        }
    }
}
