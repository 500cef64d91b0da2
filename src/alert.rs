//! Threshold alerts with cooldown-based deduplication.
//!
//! Every raised alert is persisted and logged at a level matching its
//! severity. CRITICAL alerts additionally go through a [`Notifier`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::db::{Alert, MetricType, NewAlert, Severity, Store};

/// Default minimum gap between two alerts with the same key.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Receives CRITICAL alerts after they are persisted.
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Notification hook that only writes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, alert: &Alert) {
        match &alert.target {
            Some(target) => tracing::error!(
                "CRITICAL ALERT NOTIFICATION: {} [Target: {}]",
                alert.message,
                target
            ),
            None => tracing::error!("CRITICAL ALERT NOTIFICATION: {}", alert.message),
        }
    }
}

/// What happened to a trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Raised; carries the row ID when persisting succeeded.
    Raised(Option<i64>),
    /// Same key fired within the cooldown.
    Suppressed,
    /// Unknown severity.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    target: Option<String>,
    severity: Severity,
    subject: String,
}

/// Raises, deduplicates and records alerts. Shared by all polling tasks.
pub struct AlertManager {
    store: Arc<Store>,
    cooldown: ChronoDuration,
    notifier: Arc<dyn Notifier>,
    recent: Mutex<HashMap<DedupKey, DateTime<Utc>>>,
}

impl AlertManager {
    pub fn new(store: Arc<Store>, cooldown: Duration) -> Self {
        Self::with_notifier(store, cooldown, Arc::new(LogNotifier))
    }

    pub fn with_notifier(store: Arc<Store>, cooldown: Duration, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            cooldown: ChronoDuration::from_std(cooldown).unwrap_or_else(|_| ChronoDuration::days(36_500)),
            notifier,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Trigger an alert from a severity name such as `"WARNING"`.
    ///
    /// Unknown severities are logged and dropped.
    pub fn trigger_alert(&self, severity: &str, message: &str, target: Option<&str>) -> AlertOutcome {
        self.trigger_alert_at(severity, message, target, Utc::now())
    }

    pub fn trigger_alert_at(
        &self,
        severity: &str,
        message: &str,
        target: Option<&str>,
        now: DateTime<Utc>,
    ) -> AlertOutcome {
        match severity.parse::<Severity>() {
            Ok(severity) => self.trigger_at(severity, message, target, now),
            Err(e) => {
                tracing::error!("{}", e);
                AlertOutcome::Rejected
            }
        }
    }

    /// Trigger an alert deduplicated by its exact text.
    pub fn trigger(&self, severity: Severity, message: &str, target: Option<&str>) -> AlertOutcome {
        self.trigger_at(severity, message, target, Utc::now())
    }

    pub fn trigger_at(
        &self,
        severity: Severity,
        message: &str,
        target: Option<&str>,
        now: DateTime<Utc>,
    ) -> AlertOutcome {
        let key = DedupKey {
            target: target.map(str::to_string),
            severity,
            subject: message.to_string(),
        };
        self.fire(key, severity, message, target, now)
    }

    /// Trigger a threshold alert deduplicated by metric rather than text,
    /// so a breach reported with changing values is raised once per cooldown.
    pub fn trigger_threshold(
        &self,
        severity: Severity,
        metric: MetricType,
        message: &str,
        target: &str,
    ) -> AlertOutcome {
        self.trigger_threshold_at(severity, metric, message, target, Utc::now())
    }

    pub fn trigger_threshold_at(
        &self,
        severity: Severity,
        metric: MetricType,
        message: &str,
        target: &str,
        now: DateTime<Utc>,
    ) -> AlertOutcome {
        let key = DedupKey {
            target: Some(target.to_string()),
            severity,
            subject: format!("threshold:{}", metric),
        };
        self.fire(key, severity, message, Some(target), now)
    }

    fn fire(
        &self,
        key: DedupKey,
        severity: Severity,
        message: &str,
        target: Option<&str>,
        now: DateTime<Utc>,
    ) -> AlertOutcome {
        {
            // Check and record under one lock so concurrent targets cannot both pass
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = recent.get(&key) {
                if now.signed_duration_since(*last) < self.cooldown {
                    tracing::debug!("Suppressing duplicate alert: {}:{}", severity, message);
                    return AlertOutcome::Suppressed;
                }
            }
            recent.retain(|_, last| now.signed_duration_since(*last) < self.cooldown);
            recent.insert(key, now);
        }

        let new_alert = NewAlert {
            timestamp: now,
            severity,
            message: message.to_string(),
            target: target.map(str::to_string),
        };
        let id = self.store.insert_alert(&new_alert);

        match severity {
            Severity::Info => tracing::info!("ALERT [{}]: {}", severity, message),
            Severity::Warning => tracing::warn!("ALERT [{}]: {}", severity, message),
            Severity::Critical => tracing::error!("ALERT [{}]: {}", severity, message),
        }

        if severity == Severity::Critical {
            self.notifier.notify(&Alert {
                id: id.unwrap_or_default(),
                timestamp: new_alert.timestamp,
                severity,
                message: new_alert.message,
                target: new_alert.target,
                acknowledged: false,
                acknowledged_at: None,
            });
        }

        AlertOutcome::Raised(id)
    }
}
