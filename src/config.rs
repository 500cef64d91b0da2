//! Configuration module for netpulse.
//!
//! Settings come from a JSON file, falling back to defaults, with a few
//! environment variables layered on top.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::db::Target;
use crate::monitor::Thresholds;
use crate::probe::ProbeBackend;

/// Config file used when `NETPULSE_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Upper bound for second-valued durations (one year).
pub const MAX_DURATION_SECS: f64 = 365.0 * 86_400.0;

/// Top-level monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between ticks of each target loop (default: 5)
    pub interval_secs: f64,
    pub targets: Vec<Target>,
    pub thresholds: Thresholds,
    pub database: DatabaseConfig,
    pub analysis: AnalysisConfig,
    pub alerts: AlertConfig,
    pub probe: ProbeConfig,
    pub monitor: LifecycleConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (default: "data/metrics.db")
    pub path: String,
    pub retention_days: i64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub baseline_samples: usize,
    pub anomaly_multiplier: f64,
    pub trend_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub backend: ProbeBackend,
    /// Per-packet timeout in seconds (default: 2)
    pub timeout_secs: f64,
    /// Packets per packet-loss probe (default: 10)
    pub loss_packets: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long `stop` waits for each target task (default: 5)
    pub join_timeout_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    /// HTTP port for the status API (default: 8080)
    pub port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5.0,
            targets: vec![
                Target::new("8.8.8.8", "Google DNS"),
                Target::new("1.1.1.1", "Cloudflare DNS"),
            ],
            thresholds: Thresholds::default(),
            database: DatabaseConfig::default(),
            analysis: AnalysisConfig::default(),
            alerts: AlertConfig::default(),
            probe: ProbeConfig::default(),
            monitor: LifecycleConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/metrics.db".to_string(),
            retention_days: 30,
            cleanup_interval_secs: 3600,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            baseline_samples: 100,
            anomaly_multiplier: 2.0,
            trend_window: 20,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { cooldown_secs: 300 }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            backend: ProbeBackend::Auto,
            timeout_secs: 2.0,
            loss_packets: 10,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { join_timeout_secs: 5.0 }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the environment.
    ///
    /// Environment variables:
    /// - `NETPULSE_CONFIG`: config file path (default: "config/config.json")
    /// - `NETPULSE_DB_PATH`: database file path
    /// - `NETPULSE_HTTP_PORT`: HTTP port
    /// - `NETPULSE_INTERVAL`: seconds between ticks
    pub fn from_env() -> Self {
        let path = env::var("NETPULSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load(&path);
        cfg.apply_env(|key| env::var(key).ok());
        cfg.sanitize();
        cfg
    }

    /// Read the config file at `path`.
    ///
    /// A missing file is created with the defaults. An unreadable or
    /// malformed file is logged and the defaults are used. Never fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.write_default(path);
                return cfg;
            }
            Err(e) => {
                tracing::error!("Error reading config {}: {}; using defaults", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<Self>(&contents) {
            Ok(mut cfg) => {
                cfg.sanitize();
                tracing::info!("Loaded configuration from {}", path.display());
                cfg
            }
            Err(e) => {
                tracing::error!("Error parsing config {}: {}; using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    fn write_default(&self, path: &Path) {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(self)?;
            fs::write(path, json)
        })();

        match result {
            Ok(()) => tracing::info!("Created default configuration at {}", path.display()),
            Err(e) => tracing::error!("Could not write default config {}: {}", path.display(), e),
        }
    }

    /// Layer variable overrides on top. Unparseable values are ignored.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(db_path) = var("NETPULSE_DB_PATH") {
            self.database.path = db_path;
        }

        if let Some(port_str) = var("NETPULSE_HTTP_PORT") {
            match port_str.parse() {
                Ok(port) => self.http.port = port,
                Err(_) => tracing::warn!("Ignoring NETPULSE_HTTP_PORT={}", port_str),
            }
        }

        if let Some(interval_str) = var("NETPULSE_INTERVAL") {
            match interval_str.parse() {
                Ok(interval) => self.interval_secs = interval,
                Err(_) => tracing::warn!("Ignoring NETPULSE_INTERVAL={}", interval_str),
            }
        }
    }

    /// Replace out-of-range values with defaults and tidy the target list.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        duration_secs(&mut self.interval_secs, defaults.interval_secs, "interval_secs");

        let t = &mut self.thresholds;
        let dt = &defaults.thresholds;
        positive_f64(&mut t.latency_warning_ms, dt.latency_warning_ms, "thresholds.latency_warning_ms");
        positive_f64(&mut t.latency_critical_ms, dt.latency_critical_ms, "thresholds.latency_critical_ms");
        positive_f64(
            &mut t.packet_loss_warning_pct,
            dt.packet_loss_warning_pct,
            "thresholds.packet_loss_warning_pct",
        );
        positive_f64(
            &mut t.packet_loss_critical_pct,
            dt.packet_loss_critical_pct,
            "thresholds.packet_loss_critical_pct",
        );

        if self.database.path.trim().is_empty() {
            tracing::warn!("Empty database.path, using {}", defaults.database.path);
            self.database.path = defaults.database.path.clone();
        }
        if self.database.retention_days <= 0 {
            tracing::warn!("Invalid database.retention_days, using {}", defaults.database.retention_days);
            self.database.retention_days = defaults.database.retention_days;
        }
        nonzero(
            &mut self.database.cleanup_interval_secs,
            defaults.database.cleanup_interval_secs,
            "database.cleanup_interval_secs",
        );

        nonzero(
            &mut self.analysis.baseline_samples,
            defaults.analysis.baseline_samples,
            "analysis.baseline_samples",
        );
        positive_f64(
            &mut self.analysis.anomaly_multiplier,
            defaults.analysis.anomaly_multiplier,
            "analysis.anomaly_multiplier",
        );
        if self.analysis.trend_window < 2 {
            tracing::warn!("Invalid analysis.trend_window, using {}", defaults.analysis.trend_window);
            self.analysis.trend_window = defaults.analysis.trend_window;
        }

        nonzero(&mut self.alerts.cooldown_secs, defaults.alerts.cooldown_secs, "alerts.cooldown_secs");

        duration_secs(&mut self.probe.timeout_secs, defaults.probe.timeout_secs, "probe.timeout_secs");
        nonzero(&mut self.probe.loss_packets, defaults.probe.loss_packets, "probe.loss_packets");

        duration_secs(
            &mut self.monitor.join_timeout_secs,
            defaults.monitor.join_timeout_secs,
            "monitor.join_timeout_secs",
        );

        nonzero(&mut self.http.port, defaults.http.port, "http.port");

        let mut hosts = std::collections::HashSet::new();
        let mut names = std::collections::HashSet::new();
        self.targets.retain_mut(|target| {
            target.host = target.host.trim().to_string();
            if target.host.is_empty() {
                tracing::warn!("Dropping target without a host");
                return false;
            }
            if target.name.trim().is_empty() {
                target.name = target.host.clone();
            }
            if !hosts.insert(target.host.clone()) {
                tracing::warn!("Dropping duplicate target host {}", target.host);
                return false;
            }
            if !names.insert(target.name.clone()) {
                tracing::warn!("Dropping duplicate target name {}", target.name);
                return false;
            }
            true
        });
    }

    pub fn interval(&self) -> Duration {
        secs_or(self.interval_secs, 5.0)
    }

    pub fn enabled_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.enabled)
    }
}

impl DatabaseConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        secs_or(self.timeout_secs, 2.0)
    }
}

impl LifecycleConfig {
    pub fn join_timeout(&self) -> Duration {
        secs_or(self.join_timeout_secs, 5.0)
    }
}

fn positive_f64(value: &mut f64, default: f64, field: &str) {
    if !value.is_finite() || *value <= 0.0 {
        tracing::warn!("Invalid {} ({}), using {}", field, value, default);
        *value = default;
    }
}

fn duration_secs(value: &mut f64, default: f64, field: &str) {
    positive_f64(value, default, field);
    if *value > MAX_DURATION_SECS {
        tracing::warn!("{} ({}) exceeds {}s, using {}", field, value, MAX_DURATION_SECS, default);
        *value = default;
    }
}

/// Unsanitized values can still be out of range for `Duration`.
fn secs_or(secs: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| Duration::from_secs_f64(default))
}

fn nonzero<T: PartialEq + Default + Copy + std::fmt::Display>(value: &mut T, default: T, field: &str) {
    if *value == T::default() {
        tracing::warn!("Invalid {} (0), using {}", field, default);
        *value = default;
    }
}
