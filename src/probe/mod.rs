//! Probe module for network monitoring.
//!
//! A probe sends a batch of ICMP echo requests to one host and reports what
//! came back. Two backends exist: native ICMP sockets and the OS `ping`
//! utility. Everything above this module talks to [`ProbeAdapter`] only.

mod command;
mod icmp;

pub use command::*;
pub use icmp::*;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Extra time allowed on top of a batch's worst case before it is abandoned.
pub const DEADLINE_MARGIN: Duration = Duration::from_secs(2);

/// Worst-case duration of a batch where every packet waits out `timeout`
/// and consecutive packets are `spacing` apart, plus [`DEADLINE_MARGIN`].
pub fn batch_deadline(count: u32, timeout: Duration, spacing: Duration) -> Duration {
    timeout
        .saturating_mul(count)
        .saturating_add(spacing.saturating_mul(count.saturating_sub(1)))
        .saturating_add(DEADLINE_MARGIN)
}

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("unrecognised probe output: {0}")]
    Parse(String),
}

/// What a probe batch observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    /// Echo requests sent.
    pub sent: u32,
    /// Echo replies received.
    pub received: u32,
    /// Round-trip times in milliseconds for the replies that were timed.
    pub rtts_ms: Vec<f64>,
}

impl ProbeReport {
    /// Mean RTT, if any reply was timed.
    pub fn mean_rtt(&self) -> Option<f64> {
        if self.rtts_ms.is_empty() {
            None
        } else {
            Some(self.rtts_ms.iter().sum::<f64>() / self.rtts_ms.len() as f64)
        }
    }

    /// Loss percentage, if any packet was sent.
    pub fn loss_pct(&self) -> Option<f64> {
        if self.sent == 0 {
            None
        } else {
            Some((self.sent - self.received.min(self.sent)) as f64 / self.sent as f64 * 100.0)
        }
    }
}

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<ProbeReport, ProbeError>> + Send + 'a>>;

/// A round-trip echo primitive.
///
/// Implementations send `count` echo requests to `host`, waiting at most
/// `timeout` for each reply. Partial success is a report, not an error.
pub trait Prober: Send + Sync {
    fn name(&self) -> &'static str;

    fn probe<'a>(&'a self, host: &'a str, count: u32, timeout: Duration) -> ProbeFuture<'a>;

    /// How long the adapter lets a batch run. Backends that pause between
    /// packets must count the pauses.
    fn deadline(&self, count: u32, timeout: Duration) -> Duration {
        batch_deadline(count, timeout, Duration::ZERO)
    }
}

/// Which probe backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeBackend {
    /// Native ICMP when the process may open ICMP sockets, else the ping command.
    #[default]
    Auto,
    Icmp,
    Command,
}

/// Build the prober for a backend choice.
pub fn build_prober(backend: ProbeBackend) -> Arc<dyn Prober> {
    match backend {
        ProbeBackend::Auto => {
            if icmp_available() {
                Arc::new(IcmpProber::new())
            } else {
                Arc::new(CommandProber::new())
            }
        }
        ProbeBackend::Icmp => Arc::new(IcmpProber::new()),
        ProbeBackend::Command => Arc::new(CommandProber::new()),
    }
}

/// The boundary between the engines and a [`Prober`].
///
/// Validates arguments, enforces the overall deadline and keeps reports
/// consistent. Failures are logged here and returned as values.
#[derive(Clone)]
pub struct ProbeAdapter {
    prober: Arc<dyn Prober>,
}

impl ProbeAdapter {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    pub fn backend_name(&self) -> &'static str {
        self.prober.name()
    }

    /// Run one probe batch against `host`.
    pub async fn probe(&self, host: &str, count: u32, timeout: Duration) -> Result<ProbeReport, ProbeError> {
        if count == 0 {
            return Err(ProbeError::Config("probe count must be at least 1".to_string()));
        }
        if timeout.is_zero() {
            return Err(ProbeError::Config("probe timeout must be positive".to_string()));
        }

        let deadline = self.prober.deadline(count, timeout);
        let result = match tokio::time::timeout(deadline, self.prober.probe(host, count, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(deadline)),
        };

        match result {
            Ok(mut report) => {
                report.received = report.received.min(report.sent);
                Ok(report)
            }
            Err(e) => {
                tracing::warn!("Probe of {} via {} failed: {}", host, self.prober.name(), e);
                Err(e)
            }
        }
    }
}
