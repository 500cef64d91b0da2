//! Periodic deletion of data past the retention window.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::db::Store;

/// Background task that runs [`Store::cleanup_old_data`] on an interval.
pub struct RetentionSweeper {
    store: Arc<Store>,
    retention_days: i64,
    every: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<Store>, retention_days: i64, every: Duration) -> Self {
        Self {
            store,
            retention_days,
            every,
        }
    }

    /// Sweep immediately, then every interval until `stop_rx` fires.
    pub async fn run(self, mut stop_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = interval.tick() => {
                    self.sweep();
                }
            }
        }
        tracing::debug!("RetentionSweeper: stopped");
    }

    fn sweep(&self) {
        match self.store.cleanup_old_data(self.retention_days) {
            Ok(report) => {
                tracing::debug!(
                    "RetentionSweeper: removed {} metrics and {} alerts",
                    report.metrics_deleted,
                    report.alerts_deleted
                );
            }
            Err(e) => tracing::error!("RetentionSweeper: cleanup failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Metric, MetricType};
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_first_sweep_is_immediate() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let old = Utc::now() - ChronoDuration::days(40);
        store.add_metric(&Metric::new(old, "gw", MetricType::Latency, 10.0)).unwrap();
        store.add_metric(&Metric::new(Utc::now(), "gw", MetricType::Latency, 11.0)).unwrap();

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let sweeper = RetentionSweeper::new(store.clone(), 30, Duration::from_secs(3600));
        let handle = tokio::spawn(sweeper.run(stop_rx));

        let mut remaining = 0;
        for _ in 0..50 {
            remaining = store.get_metrics("gw", MetricType::Latency, None, None).unwrap().len();
            if remaining == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining, 1);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
