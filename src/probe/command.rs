//! Ping probe backed by the operating system's `ping` utility.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use super::{batch_deadline, ProbeError, ProbeFuture, ProbeReport, Prober};

/// Default gap between requests for every supported `ping` dialect.
pub(crate) const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Command-line flavour of the local `ping` utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingDialect {
    /// iputils / busybox: `-W` is seconds.
    Linux,
    /// macOS and the BSDs: `-W` is milliseconds.
    Bsd,
    Windows,
}

impl PingDialect {
    /// The dialect of the platform we were built for.
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            PingDialect::Windows
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            PingDialect::Bsd
        } else {
            PingDialect::Linux
        }
    }

    /// Arguments for `count` packets with a per-packet `timeout`.
    pub fn args(&self, host: &str, count: u32, timeout: Duration) -> Vec<String> {
        let count = count.to_string();
        match self {
            PingDialect::Linux => vec![
                "-c".to_string(),
                count,
                "-W".to_string(),
                timeout.as_secs().max(1).to_string(),
                host.to_string(),
            ],
            PingDialect::Bsd => vec![
                "-c".to_string(),
                count,
                "-W".to_string(),
                timeout.as_millis().max(1).to_string(),
                host.to_string(),
            ],
            PingDialect::Windows => vec![
                "-n".to_string(),
                count,
                "-w".to_string(),
                timeout.as_millis().max(1).to_string(),
                host.to_string(),
            ],
        }
    }
}

/// Probe that shells out to `ping`.
#[derive(Debug, Clone)]
pub struct CommandProber {
    dialect: PingDialect,
}

impl CommandProber {
    pub fn new() -> Self {
        Self::with_dialect(PingDialect::host())
    }

    pub fn with_dialect(dialect: PingDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> PingDialect {
        self.dialect
    }
}

impl Default for CommandProber {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober for CommandProber {
    fn name(&self) -> &'static str {
        "command"
    }

    fn probe<'a>(&'a self, host: &'a str, count: u32, timeout: Duration) -> ProbeFuture<'a> {
        Box::pin(run_ping_command(self.dialect, host, count, timeout))
    }

    fn deadline(&self, count: u32, timeout: Duration) -> Duration {
        batch_deadline(count, timeout, PING_INTERVAL)
    }
}

/// Run ping via command execution.
pub(crate) async fn run_ping_command(
    dialect: PingDialect,
    host: &str,
    count: u32,
    timeout: Duration,
) -> Result<ProbeReport, ProbeError> {
    let output = Command::new("ping")
        .args(dialect.args(host, count, timeout))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_ping_output(&stdout, count) {
        Ok(report) => Ok(report),
        Err(e) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            tracing::debug!("ping {} exited with {}: {}", host, output.status, e);
            Err(ProbeError::Command(format!("ping failed: {}", detail)))
        }
        Err(e) => Err(e),
    }
}

/// Parse ping output from any supported dialect into a report.
///
/// Output that carries packet counts is a report even at 100% loss.
pub fn parse_ping_output(output: &str, expected_count: u32) -> Result<ProbeReport, ProbeError> {
    // Per-packet reply "time=12.3 ms", "time<1ms", "time=14ms"
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let per_packet = PER_PACKET
        .get_or_init(|| Regex::new(r"time[=<]\s*(?P<val>[0-9]+(?:\.[0-9]+)?)\s*ms").expect("static regex"));

    // "4 packets transmitted, 3 received" / "1 packets transmitted, 1 packets received"
    static UNIX_COUNTS: OnceLock<Regex> = OnceLock::new();
    let unix_counts = UNIX_COUNTS.get_or_init(|| {
        Regex::new(r"(?P<sent>\d+)\s+packets transmitted,\s+(?P<recv>\d+)\s+(?:packets\s+)?received")
            .expect("static regex")
    });

    // "Packets: Sent = 4, Received = 4, Lost = 0 (0% loss)"
    static WINDOWS_COUNTS: OnceLock<Regex> = OnceLock::new();
    let windows_counts = WINDOWS_COUNTS.get_or_init(|| {
        Regex::new(r"Sent\s*=\s*(?P<sent>\d+),\s*Received\s*=\s*(?P<recv>\d+)").expect("static regex")
    });

    // "rtt min/avg/max/mdev = ..." (Linux), "round-trip min/avg/max/stddev = ..." (BSD)
    static UNIX_SUMMARY: OnceLock<Regex> = OnceLock::new();
    let unix_summary = UNIX_SUMMARY.get_or_init(|| {
        Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*[0-9.]+/(?P<avg>[0-9.]+)/")
            .expect("static regex")
    });

    // "Minimum = 13ms, Maximum = 15ms, Average = 14ms"
    static WINDOWS_SUMMARY: OnceLock<Regex> = OnceLock::new();
    let windows_summary = WINDOWS_SUMMARY
        .get_or_init(|| Regex::new(r"Average\s*=\s*(?P<avg>[0-9]+)\s*ms").expect("static regex"));

    let mut rtts_ms: Vec<f64> = per_packet
        .captures_iter(output)
        .filter_map(|caps| caps.name("val")?.as_str().parse::<f64>().ok())
        .collect();

    let counts = unix_counts
        .captures(output)
        .or_else(|| windows_counts.captures(output))
        .and_then(|caps| {
            let sent = caps.name("sent")?.as_str().parse::<u32>().ok()?;
            let recv = caps.name("recv")?.as_str().parse::<u32>().ok()?;
            Some((sent, recv))
        });

    let (sent, received) = match counts {
        Some(counts) => counts,
        // Replies without a summary: trust the request count
        None if !rtts_ms.is_empty() => (expected_count.max(rtts_ms.len() as u32), rtts_ms.len() as u32),
        None => {
            return Err(ProbeError::Parse(format!(
                "no packet counts in ping output: {}",
                output.trim()
            )))
        }
    };
    let received = received.min(sent);

    if rtts_ms.is_empty() && received > 0 {
        let avg = unix_summary
            .captures(output)
            .or_else(|| windows_summary.captures(output))
            .and_then(|caps| caps.name("avg")?.as_str().parse::<f64>().ok());
        if let Some(avg) = avg {
            rtts_ms = vec![avg; received as usize];
        }
    }

    Ok(ProbeReport {
        sent,
        received,
        rtts_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OK: &str = r#"PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.3 ms
64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=14.1 ms
64 bytes from 8.8.8.8: icmp_seq=3 ttl=117 time=13.2 ms

--- 8.8.8.8 ping statistics ---
3 packets transmitted, 3 received, 0% packet loss, time 2003ms
rtt min/avg/max/mdev = 12.300/13.200/14.100/0.734 ms"#;

    const LINUX_PARTIAL: &str = r#"PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.
64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=1.05 ms
64 bytes from 10.0.0.1: icmp_seq=4 ttl=64 time=0.95 ms

--- 10.0.0.1 ping statistics ---
4 packets transmitted, 2 received, 50% packet loss, time 3050ms
rtt min/avg/max/mdev = 0.950/1.000/1.050/0.050 ms"#;

    const LINUX_UNREACHABLE: &str = r#"PING 10.255.255.1 (10.255.255.1) 56(84) bytes of data.

--- 10.255.255.1 ping statistics ---
5 packets transmitted, 0 received, 100% packet loss, time 4098ms"#;

    const MACOS_SUMMARY_ONLY: &str = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;

    const WINDOWS_OK: &str = r#"Pinging 1.1.1.1 with 32 bytes of data:
Reply from 1.1.1.1: bytes=32 time=14ms TTL=58
Reply from 1.1.1.1: bytes=32 time<1ms TTL=58

Ping statistics for 1.1.1.1:
    Packets: Sent = 2, Received = 2, Lost = 0 (0% loss),
Approximate round trip times in milli-seconds:
    Minimum = 1ms, Maximum = 14ms, Average = 7ms"#;

    #[test]
    fn test_parse_linux() {
        let report = parse_ping_output(LINUX_OK, 3).unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.received, 3);
        assert_eq!(report.rtts_ms, vec![12.3, 14.1, 13.2]);
        assert!((report.mean_rtt().unwrap() - 13.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_linux_partial_loss() {
        let report = parse_ping_output(LINUX_PARTIAL, 4).unwrap();
        assert_eq!((report.sent, report.received), (4, 2));
        assert_eq!(report.loss_pct(), Some(50.0));
    }

    #[test]
    fn test_parse_total_loss_is_a_report() {
        let report = parse_ping_output(LINUX_UNREACHABLE, 5).unwrap();
        assert_eq!((report.sent, report.received), (5, 0));
        assert!(report.rtts_ms.is_empty());
        assert_eq!(report.loss_pct(), Some(100.0));
    }

    #[test]
    fn test_parse_macos_summary_fallback() {
        let report = parse_ping_output(MACOS_SUMMARY_ONLY, 1).unwrap();
        assert_eq!((report.sent, report.received), (1, 1));
        assert_eq!(report.rtts_ms, vec![17.906]);
    }

    #[test]
    fn test_parse_windows() {
        let report = parse_ping_output(WINDOWS_OK, 2).unwrap();
        assert_eq!((report.sent, report.received), (2, 2));
        assert_eq!(report.rtts_ms, vec![14.0, 1.0]);
    }

    #[test]
    fn test_parse_garbage() {
        let result = parse_ping_output("ping: unknown host invalid.host.example", 1);
        assert!(matches!(result, Err(ProbeError::Parse(_))));
    }

    #[test]
    fn test_deadline_counts_ping_interval() {
        let prober = CommandProber::new();
        // ten requests one second apart, each allowed half a second
        assert_eq!(
            prober.deadline(10, Duration::from_millis(500)),
            Duration::from_millis(5_000 + 9_000 + 2_000)
        );
    }

    #[test]
    fn test_dialect_args() {
        let timeout = Duration::from_secs(2);
        assert_eq!(
            PingDialect::Linux.args("8.8.8.8", 10, timeout),
            vec!["-c", "10", "-W", "2", "8.8.8.8"]
        );
        assert_eq!(
            PingDialect::Bsd.args("8.8.8.8", 1, timeout),
            vec!["-c", "1", "-W", "2000", "8.8.8.8"]
        );
        assert_eq!(
            PingDialect::Windows.args("8.8.8.8", 4, timeout),
            vec!["-n", "4", "-w", "2000", "8.8.8.8"]
        );
    }
}
