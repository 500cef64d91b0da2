//! Latency measurement on top of the probe adapter.

use serde::Serialize;
use std::time::Duration;

use super::stats;
use crate::probe::ProbeAdapter;

/// Default per-packet timeout for latency probes.
pub const DEFAULT_LATENCY_TIMEOUT: Duration = Duration::from_secs(2);

/// Statistical summary of a detailed latency measurement, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub stddev_ms: f64,
    pub p95_ms: f64,
    pub samples: usize,
}

impl LatencyStats {
    /// Summarise a non-empty set of RTTs.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let avg_ms = stats::mean(samples)?;
        Some(Self {
            min_ms: samples.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg_ms,
            stddev_ms: stats::sample_stddev(samples).unwrap_or(0.0),
            p95_ms: stats::percentile_95(samples)?,
            samples: samples.len(),
        })
    }
}

/// Round-trip latency measurements.
#[derive(Clone)]
pub struct LatencyEngine {
    adapter: ProbeAdapter,
    timeout: Duration,
}

impl LatencyEngine {
    pub fn new(adapter: ProbeAdapter) -> Self {
        Self {
            adapter,
            timeout: DEFAULT_LATENCY_TIMEOUT,
        }
    }

    /// Use `timeout` per packet for detailed measurements.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One representative latency in ms: the mean RTT of a `count`-packet probe.
    pub async fn measure(&self, host: &str, count: u32, timeout: Duration) -> Option<f64> {
        let report = self.adapter.probe(host, count, timeout).await.ok()?;
        match report.mean_rtt() {
            Some(latency) => {
                tracing::debug!("Latency to {}: {:.2}ms", host, latency);
                Some(latency)
            }
            None => {
                tracing::warn!("No replies from {} ({}/{} received)", host, report.received, report.sent);
                None
            }
        }
    }

    /// `count` independent single-packet measurements summarised.
    ///
    /// Failed probes are left out; `None` only if every probe failed.
    pub async fn measure_detailed(&self, host: &str, count: u32) -> Option<LatencyStats> {
        let mut latencies = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if let Some(latency) = self.measure(host, 1, self.timeout).await {
                latencies.push(latency);
            }
        }

        let Some(stats) = LatencyStats::from_samples(&latencies) else {
            tracing::warn!("No successful measurements for {}", host);
            return None;
        };

        tracing::info!(
            "Detailed stats for {}: avg={:.2}ms, min={:.2}ms, max={:.2}ms, stddev={:.2}ms, p95={:.2}ms",
            host,
            stats.avg_ms,
            stats.min_ms,
            stats.max_ms,
            stats.stddev_ms,
            stats.p95_ms
        );
        Some(stats)
    }
}
