//! Alert manager — threshold rules over metric snapshots.
//!
//! Every rule is checked against every snapshot passed in. A crossing
//! raises an [`Alert`] unless the same rule already fired within its
//! cooldown. Alerts are handed to the rule's enabled channels on spawned
//! tasks; the caller never waits on delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use gridtune_core::{
    AlertRule, AlertingConfig, ChannelConfig, Comparison, ConfigResult, MetricKind, MetricSnapshot,
    Severity, Threshold, epoch_millis,
};

use crate::channel::{NotificationChannel, build_channel};

/// Alerts kept for inspection.
const MAX_HISTORY: usize = 1000;
/// Tolerance for `==` and `!=` comparisons.
const EQUALITY_EPSILON: f64 = 1e-9;

/// One threshold crossing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub rule_id: String,
    pub metric: MetricKind,
    pub severity: Severity,
    pub triggering_value: f64,
    /// Unix timestamp (milliseconds) when the alert was raised.
    pub timestamp: u64,
    pub message: String,
}

struct Channel {
    config: ChannelConfig,
    sink: Arc<dyn NotificationChannel>,
}

pub struct AlertManager {
    rules: RwLock<Vec<AlertRule>>,
    channels: RwLock<HashMap<String, Channel>>,
    last_fired: Mutex<HashMap<String, Instant>>,
    history: Mutex<VecDeque<Alert>>,
}

/// Whether `value` crosses `threshold` under `operator`.
pub fn crosses(operator: Comparison, threshold: Threshold, value: f64) -> bool {
    match (operator, threshold) {
        (Comparison::GreaterThan, Threshold::Value(t)) => value > t,
        (Comparison::LessThan, Threshold::Value(t)) => value < t,
        (Comparison::Equal, Threshold::Value(t)) => (value - t).abs() <= EQUALITY_EPSILON,
        (Comparison::NotEqual, Threshold::Value(t)) => (value - t).abs() > EQUALITY_EPSILON,
        (Comparison::Between, Threshold::Range([lo, hi])) => value >= lo && value <= hi,
        // Rejected by config validation.
        _ => false,
    }
}

fn describe(rule: &AlertRule, value: f64) -> String {
    let bound = match (rule.operator, rule.threshold) {
        (Comparison::GreaterThan, Threshold::Value(t)) => format!("> {t}"),
        (Comparison::LessThan, Threshold::Value(t)) => format!("< {t}"),
        (Comparison::Equal, Threshold::Value(t)) => format!("== {t}"),
        (Comparison::NotEqual, Threshold::Value(t)) => format!("!= {t}"),
        (_, Threshold::Range([lo, hi])) => format!("in [{lo}, {hi}]"),
        (Comparison::Between, Threshold::Value(t)) => format!("~ {t}"),
    };
    format!("{} {value} {bound}", rule.metric)
}

impl AlertManager {
    /// Build from configuration. Channels that cannot be built are logged
    /// and skipped.
    pub fn new(config: &AlertingConfig) -> Self {
        let manager = Self {
            rules: RwLock::new(config.rules.clone()),
            channels: RwLock::new(HashMap::new()),
            last_fired: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
        };
        *manager.channels.write() = build_channels(&config.channels);
        manager
    }

    /// Add or replace a channel with a custom sink.
    pub fn register_channel(&self, config: ChannelConfig, sink: Arc<dyn NotificationChannel>) {
        self.channels
            .write()
            .insert(config.id.clone(), Channel { config, sink });
    }

    pub fn add_rule(&self, rule: AlertRule) {
        let mut rules = self.rules.write();
        rules.retain(|r| r.id != rule.id);
        rules.push(rule);
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Evaluate every rule against every snapshot and return the alerts
    /// raised. Dispatch happens in the background.
    pub fn check_thresholds(&self, snapshots: &[MetricSnapshot]) -> Vec<Alert> {
        let rules = self.rules.read().clone();
        let mut raised = Vec::new();

        for rule in &rules {
            for snapshot in snapshots {
                let value = snapshot.value(rule.metric);
                if !crosses(rule.operator, rule.threshold, value) {
                    continue;
                }
                if !self.try_fire(rule) {
                    debug!(rule = %rule.id, value, "alert suppressed by cooldown");
                    continue;
                }

                let alert = Alert {
                    rule_id: rule.id.clone(),
                    metric: rule.metric,
                    severity: rule.severity,
                    triggering_value: value,
                    timestamp: epoch_millis(),
                    message: describe(rule, value),
                };
                info!(rule = %rule.id, severity = ?rule.severity, value, "alert raised");
                self.remember(alert.clone());
                self.dispatch(&alert, &rule.channels);
                raised.push(alert);
            }
        }
        raised
    }

    /// Stamp the rule as fired unless it is still cooling down.
    fn try_fire(&self, rule: &AlertRule) -> bool {
        let now = Instant::now();
        let cooldown = Duration::from_secs(rule.cooldown_seconds);
        let mut last_fired = self.last_fired.lock();
        if let Some(at) = last_fired.get(&rule.id)
            && now.duration_since(*at) < cooldown
        {
            return false;
        }
        last_fired.insert(rule.id.clone(), now);
        true
    }

    fn remember(&self, alert: Alert) {
        let mut history = self.history.lock();
        history.push_back(alert);
        if history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    fn dispatch(&self, alert: &Alert, channel_ids: &[String]) {
        let sinks: Vec<(String, Arc<dyn NotificationChannel>)> = {
            let channels = self.channels.read();
            channel_ids
                .iter()
                .filter_map(|id| channels.get(id))
                .filter(|c| c.config.enabled)
                .map(|c| (c.config.id.clone(), Arc::clone(&c.sink)))
                .collect()
        };
        if sinks.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(rule = %alert.rule_id, "no async runtime, alert not dispatched");
            return;
        };
        for (channel_id, sink) in sinks {
            let alert = alert.clone();
            runtime.spawn(async move {
                if let Err(e) = sink.send(&alert).await {
                    warn!(channel = %channel_id, rule = %alert.rule_id, error = %e, "alert delivery failed");
                } else {
                    debug!(channel = %channel_id, rule = %alert.rule_id, "alert delivered");
                }
            });
        }
    }

    /// Most recent alerts, newest last.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Validate and replace rules and channels. Cooldowns of rules that
    /// survive the update are kept.
    pub fn reconfigure(&self, config: &AlertingConfig) -> ConfigResult<()> {
        config.validate()?;
        let channels = build_channels(&config.channels);
        {
            let mut last_fired = self.last_fired.lock();
            last_fired.retain(|id, _| config.rules.iter().any(|r| &r.id == id));
        }
        *self.rules.write() = config.rules.clone();
        *self.channels.write() = channels;
        info!(rules = config.rules.len(), channels = config.channels.len(), "alerting reconfigured");
        Ok(())
    }
}

fn build_channels(configs: &[ChannelConfig]) -> HashMap<String, Channel> {
    let mut channels = HashMap::new();
    for config in configs {
        match build_channel(config) {
            Ok(sink) => {
                channels.insert(
                    config.id.clone(),
                    Channel {
                        config: config.clone(),
                        sink,
                    },
                );
            }
            Err(e) => warn!(channel = %config.id, error = %e, "notification channel skipped"),
        }
    }
    channels
}
