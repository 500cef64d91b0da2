//! Monitor orchestrating one polling loop per target.

mod retention;
mod threshold;

pub use retention::*;
pub use threshold::*;

use crate::alert::AlertManager;
use crate::config::MonitorConfig;
use crate::db::{DbError, Metric, MetricSummary, MetricType, Store, Target};
use crate::engine::{LatencyEngine, PacketLossEngine, Trend, TrendAnalyzer};
use crate::probe::ProbeAdapter;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Run state of the monitor and of each target loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Latest known state of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetState {
    pub host: String,
    pub name: String,
    pub enabled: bool,
    pub state: Lifecycle,
    pub last_tick: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub packet_loss_pct: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub trend: Trend,
    /// Whether the last measured latency was far above the baseline.
    pub anomalous: bool,
    pub consecutive_failures: u32,
}

impl TargetState {
    fn new(target: &Target) -> Self {
        Self {
            host: target.host.clone(),
            name: target.name.clone(),
            enabled: target.enabled,
            state: Lifecycle::Idle,
            last_tick: None,
            latency_ms: None,
            packet_loss_pct: None,
            jitter_ms: None,
            trend: Trend::InsufficientData,
            anomalous: false,
            consecutive_failures: 0,
        }
    }
}

type States = Arc<RwLock<HashMap<String, TargetState>>>;

/// Polls every enabled target on its own task until stopped.
pub struct Monitor {
    config: Arc<MonitorConfig>,
    store: Arc<Store>,
    alerts: Arc<AlertManager>,
    latency: LatencyEngine,
    loss: PacketLossEngine,
    backend: &'static str,
    lifecycle: watch::Sender<Lifecycle>,
    stop_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    states: States,
}

impl Monitor {
    pub fn new(config: MonitorConfig, store: Arc<Store>, alerts: Arc<AlertManager>, adapter: ProbeAdapter) -> Self {
        let states = config
            .targets
            .iter()
            .map(|t| (t.name.clone(), TargetState::new(t)))
            .collect();
        let (lifecycle, _) = watch::channel(Lifecycle::Idle);
        let (stop_tx, _) = broadcast::channel(1);

        Self {
            backend: adapter.backend_name(),
            latency: LatencyEngine::new(adapter.clone()).with_timeout(config.probe.timeout()),
            loss: PacketLossEngine::new(adapter),
            config: Arc::new(config),
            store,
            alerts,
            lifecycle,
            stop_tx,
            tasks: Mutex::new(Vec::new()),
            states: Arc::new(RwLock::new(states)),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Start all target loops and wait until [`Monitor::stop`] completes.
    ///
    /// Returns immediately with a warning if the monitor is already running.
    pub async fn start(&self) {
        let mut lifecycle_rx = self.lifecycle.subscribe();
        {
            let mut tasks = self.tasks.lock().await;
            let started = self.lifecycle.send_if_modified(|state| match state {
                Lifecycle::Idle | Lifecycle::Stopped => {
                    *state = Lifecycle::Running;
                    true
                }
                _ => false,
            });
            if !started {
                tracing::warn!("Monitor is already running");
                return;
            }

            let targets: Vec<Target> = self.config.enabled_targets().cloned().collect();
            if targets.is_empty() {
                tracing::warn!("No enabled targets configured");
            }
            tracing::info!(
                "Starting network monitor for {} targets (interval {}s, probe backend {})",
                targets.len(),
                self.config.interval_secs,
                self.backend
            );

            for target in targets {
                self.set_state(&target.name, Lifecycle::Running).await;
                let name = target.name.clone();
                let target_loop = TargetLoop::new(self, target);
                let handle = tokio::spawn(target_loop.run(self.stop_tx.subscribe()));
                tasks.push((name, handle));
            }

            let sweeper = RetentionSweeper::new(
                self.store.clone(),
                self.config.database.retention_days,
                self.config.database.cleanup_interval(),
            );
            tasks.push((
                "retention".to_string(),
                tokio::spawn(sweeper.run(self.stop_tx.subscribe())),
            ));
        }

        if lifecycle_rx.wait_for(|state| *state == Lifecycle::Stopped).await.is_err() {
            tracing::error!("Monitor lifecycle channel closed");
        }
    }

    /// Signal every loop to stop and wait for them. No-op unless running.
    ///
    /// Each task gets the configured join timeout; tasks that overrun are
    /// abandoned, not aborted.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        let stopping = self.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Running {
                *state = Lifecycle::Stopping;
                true
            } else {
                false
            }
        });
        if !stopping {
            tracing::debug!("Monitor is not running");
            return;
        }

        tracing::info!("Stopping network monitor...");
        {
            let mut states = self.states.write().await;
            for state in states.values_mut().filter(|s| s.state == Lifecycle::Running) {
                state.state = Lifecycle::Stopping;
            }
        }
        let _ = self.stop_tx.send(());

        let join_timeout = self.config.monitor.join_timeout();
        for (name, handle) in tasks.drain(..) {
            match tokio::time::timeout(join_timeout, handle).await {
                Ok(Ok(())) => tracing::debug!("Task for {} stopped", name),
                Ok(Err(e)) => tracing::error!("Task for {} ended abnormally: {}", name, e),
                Err(_) => tracing::warn!(
                    "Task for {} did not stop within {:?}, abandoning it",
                    name,
                    join_timeout
                ),
            }
        }

        self.lifecycle.send_replace(Lifecycle::Stopped);
        tracing::info!("Network monitor stopped");
    }

    /// Per-type summary of a target's metrics over the last `hours`.
    pub fn get_statistics(&self, target: &str, hours: i64) -> Result<BTreeMap<MetricType, MetricSummary>, DbError> {
        self.store.get_statistics(target, hours)
    }

    /// Every configured target with its latest state, in config order.
    pub async fn target_states(&self) -> Vec<TargetState> {
        let states = self.states.read().await;
        self.config
            .targets
            .iter()
            .filter_map(|t| states.get(&t.name).cloned())
            .collect()
    }

    async fn set_state(&self, name: &str, lifecycle: Lifecycle) {
        if let Some(state) = self.states.write().await.get_mut(name) {
            state.state = lifecycle;
        }
    }
}

/// Everything one target's polling task owns.
struct TargetLoop {
    target: Target,
    config: Arc<MonitorConfig>,
    store: Arc<Store>,
    alerts: Arc<AlertManager>,
    latency: LatencyEngine,
    loss: PacketLossEngine,
    states: States,
    analyzer: TrendAnalyzer,
    previous_latency: Option<f64>,
    trend: Trend,
    anomalous: bool,
}

impl TargetLoop {
    fn new(monitor: &Monitor, target: Target) -> Self {
        Self {
            target,
            config: monitor.config.clone(),
            store: monitor.store.clone(),
            alerts: monitor.alerts.clone(),
            latency: monitor.latency.clone(),
            loss: monitor.loss.clone(),
            states: monitor.states.clone(),
            analyzer: TrendAnalyzer::new(monitor.config.analysis.baseline_samples),
            previous_latency: None,
            trend: Trend::InsufficientData,
            anomalous: false,
        }
    }

    async fn run(mut self, mut stop_rx: broadcast::Receiver<()>) {
        tracing::info!("Monitoring {} ({})", self.target.name, self.target.host);

        // Stagger first ticks so targets do not probe in lockstep
        let stagger = Duration::from_millis(rand::random::<u64>() % 100);
        tokio::select! {
            _ = stop_rx.recv() => {
                self.finish().await;
                return;
            }
            _ = tokio::time::sleep(stagger) => {}
        }

        let interval = self.config.interval();
        loop {
            if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            self.tick().await;

            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.finish().await;
    }

    async fn finish(&self) {
        if let Some(state) = self.states.write().await.get_mut(&self.target.name) {
            state.state = Lifecycle::Stopped;
        }
        tracing::info!("Stopped monitoring {}", self.target.name);
    }

    /// Measure, record and evaluate once. `None` when latency could not be measured.
    async fn tick(&mut self) -> Option<NetworkSample> {
        let timestamp = Utc::now();
        let host = self.target.host.as_str();
        let timeout = self.config.probe.timeout();

        let latency = self.latency.measure(host, 1, timeout).await;
        let packet_loss = self.loss.analyze(host, self.config.probe.loss_packets, timeout).await;

        let jitter = match (latency, self.previous_latency) {
            (Some(current), Some(previous)) if previous > 0.0 => (current - previous).abs(),
            _ => 0.0,
        };
        self.previous_latency = latency;

        let Some(latency) = latency else {
            tracing::warn!("Failed to measure latency for {}", self.target.name);
            self.record_failure(timestamp, packet_loss).await;
            return None;
        };

        // Judge against the baseline before this value joins it
        self.anomalous = self
            .analyzer
            .detect_anomaly(latency, self.config.analysis.anomaly_multiplier);
        self.analyzer.add_measurement(latency);

        let trend = self.analyzer.trend(self.config.analysis.trend_window);
        if trend != self.trend {
            if trend != Trend::InsufficientData {
                tracing::info!("Latency trend for {} is {}", self.target.name, trend);
            }
            self.trend = trend;
        }

        let sample = NetworkSample {
            timestamp,
            target: self.target.name.clone(),
            latency_ms: latency,
            packet_loss_pct: packet_loss,
            jitter_ms: jitter,
        };

        for (metric_type, value) in [
            (MetricType::Latency, sample.latency_ms),
            (MetricType::PacketLoss, sample.packet_loss_pct),
            (MetricType::Jitter, sample.jitter_ms),
        ] {
            self.store
                .insert_metric(&Metric::new(timestamp, &sample.target, metric_type, value));
        }

        for breach in evaluate(&self.config.thresholds, &sample) {
            self.alerts
                .trigger_threshold(breach.severity, breach.metric_type, &breach.message, &sample.target);
        }

        tracing::debug!(
            "{}: latency={:.2}ms loss={:.2}% jitter={:.2}ms",
            sample.target,
            sample.latency_ms,
            sample.packet_loss_pct,
            sample.jitter_ms
        );
        self.record_success(&sample).await;
        Some(sample)
    }

    async fn record_success(&self, sample: &NetworkSample) {
        if let Some(state) = self.states.write().await.get_mut(&self.target.name) {
            state.last_tick = Some(sample.timestamp);
            state.latency_ms = Some(sample.latency_ms);
            state.packet_loss_pct = Some(sample.packet_loss_pct);
            state.jitter_ms = Some(sample.jitter_ms);
            state.trend = self.trend;
            state.anomalous = self.anomalous;
            state.consecutive_failures = 0;
        }
    }

    async fn record_failure(&self, timestamp: DateTime<Utc>, packet_loss: f64) {
        if let Some(state) = self.states.write().await.get_mut(&self.target.name) {
            state.last_tick = Some(timestamp);
            state.latency_ms = None;
            state.packet_loss_pct = Some(packet_loss);
            state.jitter_ms = None;
            state.consecutive_failures += 1;
        }
    }
}
