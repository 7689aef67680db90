//! Monitoring system — retained metric history.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use gridtune_core::{ConfigResult, MetricSnapshot, MonitoringConfig, TimeRange, epoch_millis};

use crate::alert::AlertManager;
use crate::collector::MetricsCollector;

/// Stores snapshots ordered by timestamp and drops those older than the
/// retention window.
pub struct MonitoringSystem {
    snapshots: RwLock<VecDeque<MetricSnapshot>>,
    config: RwLock<MonitoringConfig>,
}

impl MonitoringSystem {
    pub fn new(config: MonitoringConfig) -> Self {
        Self {
            snapshots: RwLock::new(VecDeque::new()),
            config: RwLock::new(config),
        }
    }

    /// Store a snapshot and prune everything past retention.
    pub fn record_metrics(&self, snapshot: MetricSnapshot) {
        let cutoff = epoch_millis().saturating_sub(self.config.read().retention_millis());
        let mut snapshots = self.snapshots.write();

        // Late arrivals are rare; keep the deque sorted.
        let at = snapshots.partition_point(|s| s.timestamp <= snapshot.timestamp);
        snapshots.insert(at, snapshot);

        let mut pruned = 0;
        while snapshots.front().is_some_and(|s| s.timestamp < cutoff) {
            snapshots.pop_front();
            pruned += 1;
        }
        if pruned > 0 {
            debug!(pruned, retained = snapshots.len(), "metric history pruned");
        }
    }

    /// The newest snapshot, or an all-zero one stamped now.
    pub fn get_current_metrics(&self) -> MetricSnapshot {
        self.snapshots
            .read()
            .back()
            .copied()
            .unwrap_or_else(MetricSnapshot::empty_now)
    }

    /// Snapshots inside `range`, oldest first.
    pub fn get_metrics(&self, range: TimeRange) -> Vec<MetricSnapshot> {
        let snapshots = self.snapshots.read();
        let start = snapshots.partition_point(|s| s.timestamp < range.start);
        snapshots
            .iter()
            .skip(start)
            .take_while(|s| s.timestamp <= range.end)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }

    pub fn config(&self) -> MonitoringConfig {
        self.config.read().clone()
    }

    pub fn reconfigure(&self, config: MonitoringConfig) -> ConfigResult<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    /// Sample the collector every `sample_interval_seconds`, store the
    /// snapshot, and check alert thresholds against it.
    pub async fn run(
        self: Arc<Self>,
        collector: Arc<MetricsCollector>,
        alerts: Arc<AlertManager>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = Duration::from_secs(self.config.read().sample_interval_seconds.max(1));
        info!(interval_secs = period.as_secs(), "metrics sampling started");
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = collector.snapshot();
                    self.record_metrics(snapshot);
                    let raised = alerts.check_thresholds(&[snapshot]);
                    if !raised.is_empty() {
                        debug!(alerts = raised.len(), "sample crossed alert thresholds");
                    }

                    let wanted = Duration::from_secs(self.config.read().sample_interval_seconds.max(1));
                    if wanted != ticker.period() {
                        ticker = tokio::time::interval_at(tokio::time::Instant::now() + wanted, wanted);
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics sampling stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridtune_core::{AlertRule, AlertingConfig, Comparison, MetricKind, Severity, Threshold};

    fn at(timestamp: u64, response_time_ms: f64) -> MetricSnapshot {
        MetricSnapshot {
            timestamp,
            response_time_ms,
            ..Default::default()
        }
    }

    #[test]
    fn current_is_empty_before_any_sample() {
        let system = MonitoringSystem::new(MonitoringConfig::default());
        let current = system.get_current_metrics();
        assert_eq!(current.response_time_ms, 0.0);
        assert!(current.timestamp > 0);
        assert!(system.is_empty());
    }

    #[test]
    fn current_is_newest_even_when_recorded_late() {
        let system = MonitoringSystem::new(MonitoringConfig::default());
        let now = epoch_millis();
        system.record_metrics(at(now, 20.0));
        system.record_metrics(at(now - 1_000, 10.0));
        assert_eq!(system.get_current_metrics().response_time_ms, 20.0);
    }

    #[test]
    fn range_query_is_inclusive_and_ordered() {
        let system = MonitoringSystem::new(MonitoringConfig::default());
        let now = epoch_millis();
        for i in 0..5 {
            system.record_metrics(at(now - 4_000 + i * 1_000, i as f64));
        }
        let got = system.get_metrics(TimeRange::new(now - 3_000, now - 1_000));
        let values: Vec<f64> = got.iter().map(|s| s.response_time_ms).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn old_snapshots_are_pruned() {
        let system = MonitoringSystem::new(MonitoringConfig {
            retention_days: 1,
            ..Default::default()
        });
        let now = epoch_millis();
        system.record_metrics(at(now - 2 * 86_400_000, 1.0));
        system.record_metrics(at(now, 2.0));
        assert_eq!(system.len(), 1);
        assert_eq!(system.get_metrics(TimeRange::new(0, u64::MAX)).len(), 1);
    }

    #[test]
    fn reconfigure_rejects_zero_interval() {
        let system = MonitoringSystem::new(MonitoringConfig::default());
        let bad = MonitoringConfig {
            sample_interval_seconds: 0,
            ..Default::default()
        };
        assert!(system.reconfigure(bad).is_err());
        assert_eq!(system.config().sample_interval_seconds, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn run_samples_and_alerts() {
        let system = Arc::new(MonitoringSystem::new(MonitoringConfig {
            sample_interval_seconds: 1,
            ..Default::default()
        }));
        let collector = Arc::new(MetricsCollector::new());
        let alerts = Arc::new(AlertManager::new(&AlertingConfig::default()));
        alerts.add_rule(AlertRule {
            id: "errors".to_string(),
            metric: MetricKind::ErrorRate,
            operator: Comparison::GreaterThan,
            threshold: Threshold::Value(0.5),
            severity: Severity::Critical,
            channels: Vec::new(),
            cooldown_seconds: 60,
        });
        collector.record_error(Duration::from_millis(5));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&system).run(collector.clone(), alerts.clone(), rx));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(system.len(), 1);
        assert_eq!(alerts.recent_alerts(10).len(), 1);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
