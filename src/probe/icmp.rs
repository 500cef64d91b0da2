//! Native ICMP echo probe.
//!
//! Uses blocking sockets in spawn_blocking for sub-millisecond timing precision,
//! falling back to the `ping` command when the kernel refuses ICMP sockets.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use super::command::{run_ping_command, PingDialect, PING_INTERVAL};
use super::{batch_deadline, ProbeError, ProbeFuture, ProbeReport, Prober};

/// Gap between consecutive echo requests in one batch.
const PACKET_SPACING: Duration = Duration::from_millis(200);

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

static ICMP_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Ping sequence counter, shared by all batches in the process.
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Whether this process may open ICMP sockets. Detected once.
pub fn icmp_available() -> bool {
    *ICMP_AVAILABLE.get_or_init(|| {
        // RAW needs CAP_NET_RAW or root
        if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
            tracing::info!("ICMP backend: raw sockets available");
            return true;
        }

        // DGRAM works unprivileged on macOS and on Linux within ping_group_range
        if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
            tracing::info!("ICMP backend: unprivileged datagram sockets available");
            return true;
        }

        tracing::info!("ICMP backend: no ICMP socket permitted, the ping command will be used");
        false
    })
}

/// Probe that sends echo requests over its own ICMP socket.
#[derive(Debug, Clone)]
pub struct IcmpProber {
    fallback: PingDialect,
}

impl IcmpProber {
    pub fn new() -> Self {
        Self {
            fallback: PingDialect::host(),
        }
    }
}

impl Default for IcmpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober for IcmpProber {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn probe<'a>(&'a self, host: &'a str, count: u32, timeout: Duration) -> ProbeFuture<'a> {
        Box::pin(async move {
            // Resolve before spawn_blocking (DNS is async)
            let ip = resolve_address(host).await?;

            let result = tokio::task::spawn_blocking(move || run_blocking_batch(ip, count, timeout))
                .await
                .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

            match result {
                Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                    tracing::warn!(
                        "ICMP socket refused for {}, using the ping command instead: {}",
                        host,
                        msg
                    );
                    run_ping_command(self.fallback, host, count, timeout).await
                }
                other => other,
            }
        })
    }

    /// Covers the ping command fallback as well as native batches.
    fn deadline(&self, count: u32, timeout: Duration) -> Duration {
        batch_deadline(count, timeout, PACKET_SPACING.max(PING_INTERVAL))
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

/// First address a host name resolves to; literals pass through.
async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<_> = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .collect();

    addrs
        .into_iter()
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}

/// An ICMP socket plus what is needed to recognise our replies on it.
struct EchoSocket {
    socket: Socket,
    v6: bool,
    /// DGRAM sockets get the identifier rewritten by the kernel.
    raw: bool,
    identifier: u16,
}

impl EchoSocket {
    fn open(ip: IpAddr) -> Result<Self, ProbeError> {
        let (domain, protocol) = match ip {
            IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
            IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
        };

        // RAW first (privileged), then DGRAM (unprivileged)
        let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
            Ok(s) => (s, true),
            Err(_) => {
                let s = Socket::new(domain, Type::DGRAM, Some(protocol))
                    .map_err(|e| ProbeError::Network(format!("cannot open ICMP socket: {}", e)))?;
                (s, false)
            }
        };

        socket
            .connect(&SocketAddr::new(ip, 0).into())
            .map_err(|e| ProbeError::Network(format!("cannot connect ICMP socket: {}", e)))?;

        Ok(Self {
            socket,
            v6: ip.is_ipv6(),
            raw,
            identifier: rand::random(),
        })
    }

    /// Send one echo request and wait for its reply. Returns the RTT in ms.
    fn echo(&self, timeout: Duration) -> Result<f64, ProbeError> {
        let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let packet = if self.v6 {
            build_icmpv6_echo_request(self.identifier, sequence)
        } else {
            build_icmp_echo_request(self.identifier, sequence)
        };

        self.socket
            .set_write_timeout(Some(timeout))
            .map_err(|e| ProbeError::Network(format!("cannot set read timeout: {}", e)))?;

        let start = Instant::now();
        self.socket.send(&packet).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ProbeError::Network(format!("permission denied: {}", e))
            } else {
                ProbeError::Network(format!("echo send failed: {}", e))
            }
        })?;

        // Receive until OUR reply shows up or the packet times out
        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(ProbeError::Timeout(timeout));
            }
            self.socket
                .set_read_timeout(Some(remaining))
                .map_err(|e| ProbeError::Network(format!("cannot set read timeout: {}", e)))?;

            let len = self.socket.recv(&mut buf).map_err(|e| {
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut {
                    ProbeError::Timeout(timeout)
                } else {
                    ProbeError::Network(format!("echo receive failed: {}", e))
                }
            })?;
            let elapsed = start.elapsed();

            // SAFETY: recv initialized the first `len` bytes
            let data: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

            if elapsed >= timeout {
                return Err(ProbeError::Timeout(timeout));
            }
            if self.is_reply(data, sequence) {
                return Ok(elapsed.as_secs_f64() * 1000.0);
            }
        }
    }

    fn is_reply(&self, data: &[u8], sequence: u16) -> bool {
        // RAW IPv4 sockets deliver the IP header too; ICMPv6 and DGRAM never do
        let offset = if !self.v6 && data.first().map(|b| b >> 4) == Some(4) {
            usize::from(data[0] & 0x0F) * 4
        } else {
            0
        };
        let Some(icmp) = data.get(offset..offset + 8) else {
            return false;
        };

        let expected_type = if self.v6 { ICMPV6_ECHO_REPLY } else { ICMP_ECHO_REPLY };
        let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
        let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);

        icmp[0] == expected_type && reply_seq == sequence && (!self.raw || reply_id == self.identifier)
    }
}

/// Send `count` echo requests over one socket. Runs on a blocking thread.
fn run_blocking_batch(ip: IpAddr, count: u32, timeout: Duration) -> Result<ProbeReport, ProbeError> {
    let socket = EchoSocket::open(ip)?;
    let mut report = ProbeReport::default();
    let mut last_error = None;

    for i in 0..count {
        if i > 0 {
            std::thread::sleep(PACKET_SPACING);
        }

        report.sent += 1;
        match socket.echo(timeout) {
            Ok(rtt) => {
                report.received += 1;
                report.rtts_ms.push(rtt);
            }
            Err(ProbeError::Timeout(_)) => {}
            Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                return Err(ProbeError::Network(msg));
            }
            Err(e) => last_error = Some(e),
        }
    }

    // Nothing got through and something other than silence went wrong
    match last_error {
        Some(e) if report.received == 0 => Err(e),
        _ => Ok(report),
    }
}

/// Build an ICMP Echo Request packet (type 8, code 0).
fn build_icmp_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = echo_request(ICMP_ECHO_REQUEST, identifier, sequence);
    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// Build an ICMPv6 Echo Request packet (type 128, code 0).
///
/// The kernel fills in the ICMPv6 checksum.
fn build_icmpv6_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    echo_request(ICMPV6_ECHO_REQUEST, identifier, sequence)
}

/// 8 byte header + 56 byte payload with a send timestamp.
fn echo_request(kind: u8, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = kind;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());
    packet
}

/// Internet checksum over `data` (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => (*hi as u32) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum_verifies() {
        let packet = build_icmp_echo_request(0x1234, 0x0001);
        // A packet carrying its own checksum sums to zero
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_icmp_checksum_odd_length() {
        assert_eq!(icmp_checksum(&[0xFF]), !0xFF00u16);
    }

    #[test]
    fn test_echo_request_layout() {
        let packet = build_icmp_echo_request(0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);

        let v6 = build_icmpv6_echo_request(0xABCD, 7);
        assert_eq!(v6[0], 128);
        assert_eq!(v6[2..4], [0, 0]);
    }

    #[test]
    fn test_permission_error_detection() {
        assert!(is_permission_error("Permission denied: os error 13"));
        assert!(is_permission_error("Operation not permitted"));
        assert!(!is_permission_error("Failed to receive: connection refused"));
    }

    #[test]
    fn test_deadline_counts_packet_spacing() {
        let prober = IcmpProber::new();
        let timeout = Duration::from_secs(2);
        // Every packet timing out plus the gaps between them
        let worst_case = timeout * 100 + PACKET_SPACING * 99;
        assert!(prober.deadline(100, timeout) > worst_case);
        assert_eq!(prober.deadline(1, timeout), timeout + crate::probe::DEADLINE_MARGIN);
    }

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let ip = resolve_address("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::from([127, 0, 0, 1]));
        let ip6 = resolve_address("::1").await.unwrap();
        assert!(ip6.is_ipv6());
    }
}
