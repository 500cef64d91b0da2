//! SQLite database store implementation.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row, ToSql};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("Not found")]
    NotFound,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const METRIC_COLUMNS: &str = "id, timestamp, target, metric_type, value, unit";
const ALERT_COLUMNS: &str =
    "id, timestamp, severity, message, target, acknowledged, acknowledged_at";

/// Thread-safe database store.
///
/// Every call is a self-contained unit of work on a single mutex-guarded
/// connection, so any number of polling tasks can write concurrently.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        tracing::debug!("Store opened at {}", path.display());
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Metrics ---

    /// Append a metric row and return its ID.
    pub fn add_metric(&self, metric: &Metric) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO metrics (timestamp, target, metric_type, value, unit) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_db_time(metric.timestamp),
                metric.target,
                metric.metric_type,
                metric.value,
                metric.unit,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a metric row, logging instead of returning failures.
    ///
    /// A lost metric must never interrupt a polling loop.
    pub fn insert_metric(&self, metric: &Metric) -> bool {
        match self.add_metric(metric) {
            Ok(_) => {
                tracing::debug!(
                    "Inserted metric: {} {}={}{}",
                    metric.target,
                    metric.metric_type,
                    metric.value,
                    metric.unit
                );
                true
            }
            Err(e) => {
                tracing::error!("Error inserting metric for {}: {}", metric.target, e);
                false
            }
        }
    }

    /// Get metrics for a target and type, optionally bounded in time, oldest first.
    pub fn get_metrics(
        &self,
        target: &str,
        metric_type: MetricType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Metric>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {METRIC_COLUMNS} FROM metrics
             WHERE target = ?1 AND metric_type = ?2
               AND (?3 IS NULL OR timestamp >= ?3)
               AND (?4 IS NULL OR timestamp <= ?4)
             ORDER BY timestamp ASC, id ASC"
        ))?;

        let metrics = stmt
            .query_map(
                params![
                    target,
                    metric_type,
                    start.map(format_db_time),
                    end.map(format_db_time),
                ],
                metric_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(metrics)
    }

    /// Most recent metric of a type for a target.
    pub fn latest_metric(&self, target: &str, metric_type: MetricType) -> Result<Option<Metric>, DbError> {
        let conn = self.conn()?;
        let metric = conn
            .query_row(
                &format!(
                    "SELECT {METRIC_COLUMNS} FROM metrics
                     WHERE target = ?1 AND metric_type = ?2
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![target, metric_type],
                metric_from_row,
            )
            .optional()?;
        Ok(metric)
    }

    /// Per-type summary of a target's metrics over the last `duration_hours`.
    ///
    /// Types without samples in the window are absent from the map.
    pub fn get_statistics(
        &self,
        target: &str,
        duration_hours: i64,
    ) -> Result<BTreeMap<MetricType, MetricSummary>, DbError> {
        let since = window_start(Utc::now(), ChronoDuration::try_hours(duration_hours));
        self.get_statistics_since(target, since)
    }

    /// Per-type summary of a target's metrics recorded at or after `since`.
    pub fn get_statistics_since(
        &self,
        target: &str,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<MetricType, MetricSummary>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT metric_type, AVG(value), MIN(value), MAX(value), COUNT(*)
             FROM metrics
             WHERE target = ?1 AND timestamp >= ?2
             GROUP BY metric_type",
        )?;

        let rows = stmt
            .query_map(params![target, format_db_time(since)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    MetricSummary {
                        average: row.get(1)?,
                        minimum: row.get(2)?,
                        maximum: row.get(3)?,
                        samples: row.get(4)?,
                    },
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut stats = BTreeMap::new();
        for (kind, summary) in rows {
            match kind.parse::<MetricType>() {
                Ok(metric_type) if summary.samples > 0 => {
                    stats.insert(metric_type, summary);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping statistics row: {}", e),
            }
        }

        Ok(stats)
    }

    // --- Alerts ---

    /// Insert a new, unacknowledged alert and return its ID.
    pub fn add_alert(&self, alert: &NewAlert) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO alerts (timestamp, severity, message, target) VALUES (?1, ?2, ?3, ?4)",
            params![
                format_db_time(alert.timestamp),
                alert.severity,
                alert.message,
                alert.target,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert an alert, logging instead of returning failures.
    pub fn insert_alert(&self, alert: &NewAlert) -> Option<i64> {
        match self.add_alert(alert) {
            Ok(id) => {
                tracing::debug!("Inserted alert {}: {} - {}", id, alert.severity, alert.message);
                Some(id)
            }
            Err(e) => {
                tracing::error!("Error inserting alert: {}", e);
                None
            }
        }
    }

    /// Get a single alert by ID.
    pub fn get_alert(&self, id: i64) -> Result<Alert, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
            params![id],
            alert_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// List alerts, newest first.
    pub fn get_alerts(&self, unacknowledged_only: bool, limit: i64) -> Result<Vec<Alert>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE (?1 = 0 OR acknowledged = 0)
             ORDER BY timestamp DESC, id DESC LIMIT ?2"
        ))?;

        let alerts = stmt
            .query_map(params![unacknowledged_only, limit], alert_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(alerts)
    }

    /// Total number of stored alerts.
    pub fn count_alerts(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM alerts", [], |r| r.get(0))?)
    }

    /// Mark an alert as acknowledged. Acknowledging twice keeps the first timestamp.
    pub fn acknowledge_alert(&self, id: i64, at: DateTime<Utc>) -> Result<Alert, DbError> {
        {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE alerts SET acknowledged = 1, acknowledged_at = ?2 WHERE id = ?1 AND acknowledged = 0",
                params![id, format_db_time(at)],
            )?;
        }
        self.get_alert(id)
    }

    // --- Retention ---

    /// Delete data older than `retention_days`.
    ///
    /// Metrics go unconditionally; alerts only once acknowledged.
    pub fn cleanup_old_data(&self, retention_days: i64) -> Result<CleanupReport, DbError> {
        self.cleanup_before(window_start(Utc::now(), ChronoDuration::try_days(retention_days)))
    }

    /// Delete metrics and acknowledged alerts recorded before `cutoff`.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport, DbError> {
        let conn = self.conn()?;
        let cutoff = format_db_time(cutoff);

        let metrics_deleted =
            conn.execute("DELETE FROM metrics WHERE timestamp < ?1", params![cutoff])?;
        let alerts_deleted = conn.execute(
            "DELETE FROM alerts WHERE timestamp < ?1 AND acknowledged = 1",
            params![cutoff],
        )?;

        let report = CleanupReport {
            metrics_deleted,
            alerts_deleted,
        };
        tracing::info!(
            "Cleanup complete: {} metrics, {} alerts removed",
            report.metrics_deleted,
            report.alerts_deleted
        );
        Ok(report)
    }
}

impl ToSql for MetricType {
    fn to_sql(&self) -> SqlResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MetricType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for Severity {
    fn to_sql(&self) -> SqlResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Severity {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: AlertError| FromSqlError::Other(Box::new(e)))
    }
}

fn metric_from_row(row: &Row<'_>) -> SqlResult<Metric> {
    let time_str: String = row.get(1)?;
    Ok(Metric {
        id: row.get(0)?,
        timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        target: row.get(2)?,
        metric_type: row.get(3)?,
        value: row.get(4)?,
        unit: row.get(5)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> SqlResult<Alert> {
    let time_str: String = row.get(1)?;
    let acked_str: Option<String> = row.get(6)?;
    Ok(Alert {
        id: row.get(0)?,
        timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        severity: row.get(2)?,
        message: row.get(3)?,
        target: row.get(4)?,
        acknowledged: row.get(5)?,
        acknowledged_at: acked_str.as_deref().and_then(parse_db_time),
    })
}

/// `now - span`, clamped to the earliest representable time when the span
/// does not fit.
fn window_start(now: DateTime<Utc>, span: Option<ChronoDuration>) -> DateTime<Utc> {
    span.and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Fixed-width UTC text, so string order is chronological order.
fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn alert_at(ts: DateTime<Utc>, message: &str) -> NewAlert {
        NewAlert {
            timestamp: ts,
            severity: Severity::Warning,
            message: message.to_string(),
            target: Some("Google DNS".to_string()),
        }
    }

    #[test]
    fn test_metrics_ordered_and_filtered() {
        let (_tmp, store) = store();
        let now = Utc::now();

        // Insert out of order
        for (offset, value) in [(30, 3.0), (10, 1.0), (20, 2.0)] {
            let ts = now - ChronoDuration::minutes(60 - offset);
            store
                .add_metric(&Metric::new(ts, "gw", MetricType::Latency, value))
                .unwrap();
        }
        store
            .add_metric(&Metric::new(now, "gw", MetricType::Jitter, 9.0))
            .unwrap();
        store
            .add_metric(&Metric::new(now, "other", MetricType::Latency, 9.0))
            .unwrap();

        let all = store.get_metrics("gw", MetricType::Latency, None, None).unwrap();
        let values: Vec<f64> = all.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert!(all.iter().all(|m| m.unit == "ms"));

        let bounded = store
            .get_metrics(
                "gw",
                MetricType::Latency,
                Some(now - ChronoDuration::minutes(45)),
                Some(now),
            )
            .unwrap();
        assert_eq!(bounded.len(), 2);
        assert_eq!(bounded[0].value, 2.0);

        let latest = store.latest_metric("gw", MetricType::Latency).unwrap().unwrap();
        assert_eq!(latest.value, 3.0);
    }

    #[test]
    fn test_statistics_skip_empty_types() {
        let (_tmp, store) = store();
        let now = Utc::now();

        for value in [10.0, 20.0, 30.0] {
            store
                .add_metric(&Metric::new(now, "gw", MetricType::Latency, value))
                .unwrap();
        }
        store
            .add_metric(&Metric::new(now, "gw", MetricType::PacketLoss, 0.0))
            .unwrap();
        // Outside the window
        store
            .add_metric(&Metric::new(
                now - ChronoDuration::hours(48),
                "gw",
                MetricType::Jitter,
                5.0,
            ))
            .unwrap();

        let stats = store.get_statistics("gw", 24).unwrap();
        assert_eq!(stats.len(), 2);
        assert!(!stats.contains_key(&MetricType::Jitter));

        let latency = &stats[&MetricType::Latency];
        assert!((latency.average - 20.0).abs() < 1e-9);
        assert_eq!(latency.minimum, 10.0);
        assert_eq!(latency.maximum, 30.0);
        assert_eq!(latency.samples, 3);

        assert!(store.get_statistics("nobody", 24).unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_keeps_unacknowledged_alerts() {
        let (_tmp, store) = store();
        let now = Utc::now();
        let old = now - ChronoDuration::days(45);

        store
            .add_metric(&Metric::new(old, "gw", MetricType::Latency, 1.0))
            .unwrap();
        store
            .add_metric(&Metric::new(now, "gw", MetricType::Latency, 2.0))
            .unwrap();

        let old_unacked = store.add_alert(&alert_at(old, "old unacked")).unwrap();
        let old_acked = store.add_alert(&alert_at(old, "old acked")).unwrap();
        let fresh_acked = store.add_alert(&alert_at(now, "fresh acked")).unwrap();
        store.acknowledge_alert(old_acked, now).unwrap();
        store.acknowledge_alert(fresh_acked, now).unwrap();

        let report = store.cleanup_old_data(30).unwrap();
        assert_eq!(
            report,
            CleanupReport {
                metrics_deleted: 1,
                alerts_deleted: 1
            }
        );

        let remaining = store.get_metrics("gw", MetricType::Latency, None, None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value, 2.0);

        assert!(store.get_alert(old_unacked).is_ok());
        assert!(matches!(store.get_alert(old_acked), Err(DbError::NotFound)));
        assert!(store.get_alert(fresh_acked).is_ok());
    }

    #[test]
    fn test_oversized_windows_clamp() {
        let (_tmp, store) = store();
        let ancient = Utc::now() - ChronoDuration::days(365 * 50);
        store
            .add_metric(&Metric::new(ancient, "gw", MetricType::Latency, 7.0))
            .unwrap();
        store.add_alert(&alert_at(ancient, "ancient")).unwrap();

        let stats = store.get_statistics("gw", 10_000_000_000).unwrap();
        assert_eq!(stats[&MetricType::Latency].samples, 1);
        assert!(store.get_statistics("gw", i64::MAX).is_ok());

        let report = store.cleanup_old_data(i64::MAX).unwrap();
        assert_eq!(report, CleanupReport::default());
        assert_eq!(store.get_metrics("gw", MetricType::Latency, None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_acknowledge_alert() {
        let (_tmp, store) = store();
        let now = Utc::now();
        let id = store.add_alert(&alert_at(now, "latency high")).unwrap();

        let alert = store.get_alert(id).unwrap();
        assert!(!alert.acknowledged);
        assert!(alert.acknowledged_at.is_none());
        assert_eq!(alert.target.as_deref(), Some("Google DNS"));

        let acked = store.acknowledge_alert(id, now).unwrap();
        assert!(acked.acknowledged);
        assert!(acked.acknowledged_at.is_some());

        assert!(store.get_alerts(true, 10).unwrap().is_empty());
        assert_eq!(store.get_alerts(false, 10).unwrap().len(), 1);
        assert!(matches!(store.acknowledge_alert(999, now), Err(DbError::NotFound)));
    }

    #[test]
    fn test_time_format_roundtrip() {
        let now = Utc::now();
        let parsed = parse_db_time(&format_db_time(now)).unwrap();
        assert_eq!(parsed, now);
        assert!(parse_db_time("2024-01-01 12:00:00").is_some());
        assert!(parse_db_time("not a time").is_none());
    }
}
