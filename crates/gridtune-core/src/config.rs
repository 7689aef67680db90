//! gridtune.toml configuration model.
//!
//! Every section and field has a default, so an empty document is a valid
//! configuration. [`GridtuneConfig::validate`] enforces the declared bounds;
//! callers apply a new configuration only after it validates.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::types::MetricKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridtuneConfig {
    pub cache: CacheConfig,
    pub balancer: BalancerConfig,
    pub scaling: ScalingConfig,
    pub monitoring: MonitoringConfig,
    pub alerting: AlertingConfig,
    pub optimizer: OptimizerConfig,
    /// Initial node registry.
    pub nodes: Vec<NodeConfig>,
}

// ── Cache ──────────────────────────────────────────────────────────

/// Ordering used to pick eviction victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least recently read first.
    Lru,
    /// Least frequently read first.
    Lfu,
    /// Oldest by creation first.
    Ttl,
    /// LRU that switches itself to LFU when the hit rate sags.
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub strategy: EvictionStrategy,
    /// Capacity in decimal megabytes (1 MB = 1,000,000 bytes).
    pub max_size_mb: u64,
    pub default_ttl_seconds: u64,
    pub min_ttl_seconds: u64,
    pub max_ttl_seconds: u64,
    /// Rolling hit rate below which an adaptive cache switches to LFU.
    pub adaptive_hit_rate_floor: f64,
}

impl CacheConfig {
    pub fn capacity_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1_000_000)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: EvictionStrategy::Adaptive,
            max_size_mb: 256,
            default_ttl_seconds: 3600,
            min_ttl_seconds: 60,
            max_ttl_seconds: 86_400,
            adaptive_hit_rate_floor: 0.7,
        }
    }
}

// ── Load balancing ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancingAlgorithm {
    RoundRobin,
    LeastConnections,
    LeastResponseTime,
    ResourceBased,
    Scored,
}

/// What happens to a node that fails its health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailoverStrategy {
    /// Mark the node unhealthy at once.
    Immediate,
    /// Mark the node draining; it becomes unhealthy once idle.
    Drain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub algorithm: BalancingAlgorithm,
    pub health_check_interval_seconds: u64,
    pub health_check_timeout_ms: u64,
    /// HTTP path probed on each node's endpoint.
    pub health_check_path: String,
    pub failover_strategy: FailoverStrategy,
    /// Consecutive failed probes before a node is taken out of rotation.
    pub unhealthy_threshold: u32,
    /// Fleet-average response time above which `optimize` switches to
    /// least-response-time.
    pub response_time_threshold_ms: f64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: BalancingAlgorithm::Scored,
            health_check_interval_seconds: 10,
            health_check_timeout_ms: 2000,
            health_check_path: "/healthz".to_string(),
            failover_strategy: FailoverStrategy::Immediate,
            unhealthy_threshold: 3,
            response_time_threshold_ms: 1000.0,
        }
    }
}

/// A backend node registered at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub endpoint: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default = "default_capacity_units")]
    pub capacity_units: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_weight() -> u32 {
    100
}

fn default_capacity_units() -> u32 {
    100
}

// ── Scaling ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub horizontal_enabled: bool,
    pub min_instances: u32,
    pub max_instances: u32,
    /// Instance count assumed at startup.
    pub initial_instances: u32,
    pub cpu_target: f64,
    pub memory_target: f64,
    pub scale_up_cooldown_seconds: u64,
    pub scale_down_cooldown_seconds: u64,
    pub vertical: VerticalScalingConfig,
    pub predictive: PredictiveScalingConfig,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            horizontal_enabled: true,
            min_instances: 1,
            max_instances: 10,
            initial_instances: 1,
            cpu_target: 0.7,
            memory_target: 0.8,
            scale_up_cooldown_seconds: 60,
            scale_down_cooldown_seconds: 300,
            vertical: VerticalScalingConfig::default(),
            predictive: PredictiveScalingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerticalScalingConfig {
    pub enabled: bool,
    pub min_cpu_millicores: u32,
    pub max_cpu_millicores: u32,
    pub cpu_step_millicores: u32,
    pub min_memory_mb: u32,
    pub max_memory_mb: u32,
    pub memory_step_mb: u32,
    /// Utilization that, sustained, triggers a step up. Half of it,
    /// sustained, triggers a step down.
    pub resize_threshold: f64,
    /// Consecutive samples that must cross the threshold.
    pub sustained_samples: usize,
}

impl Default for VerticalScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_cpu_millicores: 250,
            max_cpu_millicores: 4000,
            cpu_step_millicores: 250,
            min_memory_mb: 256,
            max_memory_mb: 8192,
            memory_step_mb: 256,
            resize_threshold: 0.85,
            sustained_samples: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastModel {
    /// Least-squares line through recent samples.
    Linear,
    /// Holt-style smoothed level plus trend.
    ExponentialSmoothing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictiveScalingConfig {
    pub enabled: bool,
    pub model: ForecastModel,
    /// How far ahead the forecast looks.
    pub horizon_seconds: u64,
    pub smoothing_alpha: f64,
    /// Samples needed before any forecast is trusted.
    pub min_history: usize,
    pub triggers: Vec<PredictiveTrigger>,
}

impl Default for PredictiveScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: ForecastModel::Linear,
            horizon_seconds: 900,
            smoothing_alpha: 0.3,
            min_history: 6,
            triggers: Vec::new(),
        }
    }
}

/// Fires a pre-emptive scale-up when the forecast crosses `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveTrigger {
    pub name: String,
    pub metric: MetricKind,
    pub threshold: f64,
    pub lead_time_seconds: u64,
    pub scale_by: u32,
}

// ── Monitoring & alerting ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub retention_days: u64,
    pub sample_interval_seconds: u64,
}

impl MonitoringConfig {
    pub fn retention_millis(&self) -> u64 {
        self.retention_days.saturating_mul(86_400_000)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            sample_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub rules: Vec<AlertRule>,
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">", alias = "gt")]
    GreaterThan,
    #[serde(rename = "<", alias = "lt")]
    LessThan,
    #[serde(rename = "==", alias = "eq")]
    Equal,
    #[serde(rename = "!=", alias = "ne")]
    NotEqual,
    #[serde(rename = "between")]
    Between,
}

/// A single bound, or an inclusive `[low, high]` range for `between`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Value(f64),
    Range([f64; 2]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub metric: MetricKind,
    pub operator: Comparison,
    pub threshold: Threshold,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Ids of the channels this rule notifies.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_cooldown() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Log,
    Email,
    Slack,
    Webhook,
    Sms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub kind: ChannelKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Webhook/Slack URL, or the relay endpoint for email and SMS.
    #[serde(default)]
    pub url: Option<String>,
    /// Email address or phone number for relayed channels.
    #[serde(default)]
    pub recipient: Option<String>,
}

fn default_true() -> bool {
    true
}

// ── Optimizer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub interval_seconds: u64,
    /// Wait between a subsystem's `optimize` and the "after" snapshot.
    pub stabilization_delay_ms: u64,
    /// TTL before confidence and complexity scaling.
    pub base_ttl_seconds: u64,
    /// Deadline for a single call into the request processor.
    pub processor_timeout_ms: u64,
    /// Request fields that make up the cache key. Empty means the whole
    /// payload.
    pub cache_key_fields: Vec<String>,
    pub pool: ResourcePoolConfig,
    pub query: QueryOptimizerConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            stabilization_delay_ms: 5000,
            base_ttl_seconds: 3600,
            processor_timeout_ms: 30_000,
            cache_key_fields: Vec::new(),
            pool: ResourcePoolConfig::default(),
            query: QueryOptimizerConfig::default(),
        }
    }
}

/// Bounds for the pool of concurrent processor slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePoolConfig {
    pub min_permits: usize,
    pub max_permits: usize,
    pub initial_permits: usize,
    pub step: usize,
    pub high_watermark: f64,
    pub low_watermark: f64,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        Self {
            min_permits: 4,
            max_permits: 256,
            initial_permits: 32,
            step: 8,
            high_watermark: 0.8,
            low_watermark: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptimizerConfig {
    /// Queries slower than this are candidates for a TTL boost.
    pub slow_query_ms: f64,
    /// Minimum executions before a query counts as hot.
    pub hot_query_count: u64,
    pub ttl_boost: f64,
    /// Fingerprints tracked before the least-used are dropped.
    pub max_tracked: usize,
}

impl Default for QueryOptimizerConfig {
    fn default() -> Self {
        Self {
            slow_query_ms: 500.0,
            hot_query_count: 10,
            ttl_boost: 2.0,
            max_tracked: 10_000,
        }
    }
}

// ── Loading & validation ───────────────────────────────────────────

impl GridtuneConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: GridtuneConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.cache.validate()?;
        self.balancer.validate()?;
        self.scaling.validate()?;
        self.monitoring.validate()?;
        self.alerting.validate()?;
        self.optimizer.validate()?;

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(ConfigError::out_of_bounds("nodes.id", "must not be empty"));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(ConfigError::out_of_bounds(
                    format!("nodes[{}]", node.id),
                    "duplicate node id",
                ));
            }
            if node.capacity_units == 0 {
                return Err(ConfigError::out_of_bounds(
                    format!("nodes[{}].capacity_units", node.id),
                    "must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_size_mb == 0 {
            return Err(ConfigError::out_of_bounds("cache.max_size_mb", "must be at least 1"));
        }
        if self.min_ttl_seconds == 0 {
            return Err(ConfigError::out_of_bounds("cache.min_ttl_seconds", "must be at least 1"));
        }
        if self.min_ttl_seconds > self.max_ttl_seconds {
            return Err(ConfigError::out_of_bounds(
                "cache.min_ttl_seconds",
                format!("{} exceeds max_ttl_seconds {}", self.min_ttl_seconds, self.max_ttl_seconds),
            ));
        }
        if !(self.min_ttl_seconds..=self.max_ttl_seconds).contains(&self.default_ttl_seconds) {
            return Err(ConfigError::out_of_bounds(
                "cache.default_ttl_seconds",
                format!(
                    "{} outside [{}, {}]",
                    self.default_ttl_seconds, self.min_ttl_seconds, self.max_ttl_seconds
                ),
            ));
        }
        check_fraction("cache.adaptive_hit_rate_floor", self.adaptive_hit_rate_floor)
    }
}

impl BalancerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.health_check_interval_seconds == 0 {
            return Err(ConfigError::out_of_bounds(
                "balancer.health_check_interval_seconds",
                "must be at least 1",
            ));
        }
        if !self.health_check_path.starts_with('/') {
            return Err(ConfigError::out_of_bounds(
                "balancer.health_check_path",
                "must start with `/`",
            ));
        }
        if self.unhealthy_threshold == 0 {
            return Err(ConfigError::out_of_bounds(
                "balancer.unhealthy_threshold",
                "must be at least 1",
            ));
        }
        if !(self.response_time_threshold_ms > 0.0) {
            return Err(ConfigError::out_of_bounds(
                "balancer.response_time_threshold_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

impl ScalingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_instances > self.max_instances {
            return Err(ConfigError::out_of_bounds(
                "scaling.min_instances",
                format!("{} exceeds max_instances {}", self.min_instances, self.max_instances),
            ));
        }
        if self.max_instances == 0 {
            return Err(ConfigError::out_of_bounds("scaling.max_instances", "must be at least 1"));
        }
        if !(self.min_instances..=self.max_instances).contains(&self.initial_instances) {
            return Err(ConfigError::out_of_bounds(
                "scaling.initial_instances",
                "must lie within [min_instances, max_instances]",
            ));
        }
        check_target("scaling.cpu_target", self.cpu_target)?;
        check_target("scaling.memory_target", self.memory_target)?;

        let v = &self.vertical;
        if v.min_cpu_millicores > v.max_cpu_millicores || v.cpu_step_millicores == 0 {
            return Err(ConfigError::out_of_bounds(
                "scaling.vertical.cpu",
                "min must not exceed max and step must be positive",
            ));
        }
        if v.min_memory_mb > v.max_memory_mb || v.memory_step_mb == 0 {
            return Err(ConfigError::out_of_bounds(
                "scaling.vertical.memory",
                "min must not exceed max and step must be positive",
            ));
        }
        check_target("scaling.vertical.resize_threshold", v.resize_threshold)?;
        if v.sustained_samples == 0 {
            return Err(ConfigError::out_of_bounds(
                "scaling.vertical.sustained_samples",
                "must be at least 1",
            ));
        }

        let p = &self.predictive;
        if !(p.smoothing_alpha > 0.0 && p.smoothing_alpha <= 1.0) {
            return Err(ConfigError::out_of_bounds(
                "scaling.predictive.smoothing_alpha",
                "must lie in (0, 1]",
            ));
        }
        if p.min_history < 2 {
            return Err(ConfigError::out_of_bounds(
                "scaling.predictive.min_history",
                "must be at least 2",
            ));
        }
        for trigger in &p.triggers {
            if trigger.scale_by == 0 {
                return Err(ConfigError::out_of_bounds(
                    format!("scaling.predictive.triggers[{}].scale_by", trigger.name),
                    "must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

impl MonitoringConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.retention_days == 0 {
            return Err(ConfigError::out_of_bounds("monitoring.retention_days", "must be at least 1"));
        }
        if self.sample_interval_seconds == 0 {
            return Err(ConfigError::out_of_bounds(
                "monitoring.sample_interval_seconds",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl AlertingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let mut channel_ids = HashSet::new();
        for channel in &self.channels {
            if !channel_ids.insert(channel.id.as_str()) {
                return Err(ConfigError::out_of_bounds(
                    format!("alerting.channels[{}]", channel.id),
                    "duplicate channel id",
                ));
            }
            match &channel.url {
                None if channel.kind != ChannelKind::Log => {
                    return Err(ConfigError::out_of_bounds(
                        format!("alerting.channels[{}].url", channel.id),
                        "required for non-log channels",
                    ));
                }
                Some(url) if !url.starts_with("http://") => {
                    return Err(ConfigError::out_of_bounds(
                        format!("alerting.channels[{}].url", channel.id),
                        "must be a plain http:// endpoint; reach https services through a relay",
                    ));
                }
                _ => {}
            }
            if matches!(channel.kind, ChannelKind::Email | ChannelKind::Sms) && channel.recipient.is_none() {
                return Err(ConfigError::out_of_bounds(
                    format!("alerting.channels[{}].recipient", channel.id),
                    "required for email and sms channels",
                ));
            }
        }

        for rule in &self.rules {
            match (rule.operator, rule.threshold) {
                (Comparison::Between, Threshold::Range([lo, hi])) if lo <= hi => {}
                (Comparison::Between, _) => {
                    return Err(ConfigError::out_of_bounds(
                        format!("alerting.rules[{}].threshold", rule.id),
                        "`between` needs a [low, high] range with low <= high",
                    ));
                }
                (_, Threshold::Range(_)) => {
                    return Err(ConfigError::out_of_bounds(
                        format!("alerting.rules[{}].threshold", rule.id),
                        "a range is only valid with `between`",
                    ));
                }
                _ => {}
            }
            for channel in &rule.channels {
                if !channel_ids.contains(channel.as_str()) {
                    return Err(ConfigError::out_of_bounds(
                        format!("alerting.rules[{}].channels", rule.id),
                        format!("unknown channel `{channel}`"),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_seconds == 0 {
            return Err(ConfigError::out_of_bounds("optimizer.interval_seconds", "must be at least 1"));
        }
        if self.base_ttl_seconds == 0 {
            return Err(ConfigError::out_of_bounds("optimizer.base_ttl_seconds", "must be at least 1"));
        }
        if self.processor_timeout_ms == 0 {
            return Err(ConfigError::out_of_bounds(
                "optimizer.processor_timeout_ms",
                "must be at least 1",
            ));
        }
        let pool = &self.pool;
        if pool.min_permits == 0 || pool.min_permits > pool.max_permits {
            return Err(ConfigError::out_of_bounds(
                "optimizer.pool.min_permits",
                "must be positive and not exceed max_permits",
            ));
        }
        if !(pool.min_permits..=pool.max_permits).contains(&pool.initial_permits) {
            return Err(ConfigError::out_of_bounds(
                "optimizer.pool.initial_permits",
                "must lie within [min_permits, max_permits]",
            ));
        }
        if pool.step == 0 {
            return Err(ConfigError::out_of_bounds("optimizer.pool.step", "must be at least 1"));
        }
        if !(pool.low_watermark < pool.high_watermark) {
            return Err(ConfigError::out_of_bounds(
                "optimizer.pool.low_watermark",
                "must be below high_watermark",
            ));
        }
        if !(self.query.ttl_boost >= 1.0) {
            return Err(ConfigError::out_of_bounds("optimizer.query.ttl_boost", "must be at least 1.0"));
        }
        Ok(())
    }
}

fn check_fraction(field: &str, value: f64) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::out_of_bounds(field, format!("{value} outside [0, 1]")))
    }
}

fn check_target(field: &str, value: f64) -> ConfigResult<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_bounds(field, format!("{value} outside (0, 1]")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_valid_default() {
        let config = GridtuneConfig::from_toml_str("").unwrap();
        assert_eq!(config, GridtuneConfig::default());
        assert_eq!(config.cache.capacity_bytes(), 256_000_000);
    }

    #[test]
    fn parses_full_document() {
        let toml_str = r#"
[cache]
strategy = "lru"
max_size_mb = 1
default_ttl_seconds = 120

[balancer]
algorithm = "round-robin"
failover_strategy = "drain"

[scaling]
min_instances = 2
max_instances = 8
initial_instances = 2

[[scaling.predictive.triggers]]
name = "evening-peak"
metric = "throughput"
threshold = 500.0
lead_time_seconds = 120
scale_by = 2

[monitoring]
retention_days = 3

[[alerting.channels]]
id = "ops"
kind = "webhook"
url = "http://127.0.0.1:9000/hook"

[[alerting.rules]]
id = "latency"
metric = "response_time_ms"
operator = ">"
threshold = 250.0
channels = ["ops"]

[[alerting.rules]]
id = "cpu-band"
metric = "cpu_utilization"
operator = "between"
threshold = [0.9, 1.0]
severity = "critical"

[[nodes]]
id = "n1"
endpoint = "127.0.0.1:7001"
capabilities = ["gpu"]
"#;
        let config = GridtuneConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.cache.strategy, EvictionStrategy::Lru);
        assert_eq!(config.cache.capacity_bytes(), 1_000_000);
        assert_eq!(config.balancer.algorithm, BalancingAlgorithm::RoundRobin);
        assert_eq!(config.balancer.failover_strategy, FailoverStrategy::Drain);
        assert_eq!(config.scaling.predictive.triggers.len(), 1);
        assert_eq!(config.alerting.rules[0].operator, Comparison::GreaterThan);
        assert_eq!(config.alerting.rules[1].threshold, Threshold::Range([0.9, 1.0]));
        assert_eq!(config.alerting.rules[1].severity, Severity::Critical);
        assert_eq!(config.nodes[0].weight, 100);
        assert_eq!(config.nodes[0].capabilities, vec!["gpu".to_string()]);
    }

    #[test]
    fn rejects_inverted_ttl_bounds() {
        let mut config = GridtuneConfig::default();
        config.cache.min_ttl_seconds = 500;
        config.cache.max_ttl_seconds = 100;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfBounds { ref field, .. } if field == "cache.min_ttl_seconds"));
    }

    #[test]
    fn rejects_min_instances_above_max() {
        let mut config = GridtuneConfig::default();
        config.scaling.min_instances = 5;
        config.scaling.max_instances = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_between_without_range() {
        let mut config = GridtuneConfig::default();
        config.alerting.rules.push(AlertRule {
            id: "bad".to_string(),
            metric: MetricKind::ErrorRate,
            operator: Comparison::Between,
            threshold: Threshold::Value(0.5),
            severity: Severity::Warning,
            channels: vec![],
            cooldown_seconds: 10,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_rule_with_unknown_channel() {
        let mut config = GridtuneConfig::default();
        config.alerting.rules.push(AlertRule {
            id: "r".to_string(),
            metric: MetricKind::ErrorRate,
            operator: Comparison::GreaterThan,
            threshold: Threshold::Value(0.5),
            severity: Severity::Warning,
            channels: vec!["missing".to_string()],
            cooldown_seconds: 10,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_webhook_without_url() {
        let mut config = GridtuneConfig::default();
        config.alerting.channels.push(ChannelConfig {
            id: "hook".to_string(),
            kind: ChannelKind::Webhook,
            enabled: true,
            url: None,
            recipient: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_https_channel_url() {
        let mut config = GridtuneConfig::default();
        config.alerting.channels.push(ChannelConfig {
            id: "slack".to_string(),
            kind: ChannelKind::Slack,
            enabled: true,
            url: Some("https://hooks.slack.com/services/T0/B0/x".to_string()),
            recipient: None,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("alerting.channels[slack].url"), "{err}");

        config.alerting.channels[0].url = Some("http://slack-relay.internal:8080/hooks/ops".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let node = NodeConfig {
            id: "n1".to_string(),
            endpoint: "127.0.0.1:1".to_string(),
            weight: 100,
            region: String::new(),
            zone: String::new(),
            capacity_units: 10,
            capabilities: vec![],
        };
        let config = GridtuneConfig {
            nodes: vec![node.clone(), node],
            ..GridtuneConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_error_is_reported() {
        let err = GridtuneConfig::from_toml_str("[cache]\nstrategy = \"fifo\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
