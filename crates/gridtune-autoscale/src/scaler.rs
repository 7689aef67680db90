//! Autoscaler — horizontal, vertical and predictive scaling.
//!
//! Decisions are made under a short synchronous lock; the scale callback
//! is awaited with no lock held.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use gridtune_core::{ConfigResult, MetricSnapshot, ScalingConfig, epoch_millis};

use crate::forecast::forecast;

/// Metric samples kept for vertical and predictive decisions.
const MAX_SAMPLES: usize = 512;
/// Applied actions kept for inspection.
const MAX_HISTORY: usize = 256;

/// Horizontal decision for the current instance count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the specified instance count.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

/// An action handed to the scale callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleTo { instances: u32 },
    /// New per-instance resource limits.
    Resize { cpu_millicores: u32, memory_mb: u32 },
    /// Scale ahead of a forecast crossing. Capacity should be ready
    /// `lead_time` before the crossing.
    Predictive {
        trigger: String,
        instances: u32,
        lead_time: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingRoutine {
    Horizontal,
    Vertical,
    Predictive,
}

/// One attempted action, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedAction {
    pub routine: ScalingRoutine,
    pub action: ScaleAction,
    /// Unix timestamp (milliseconds).
    pub at: u64,
    pub applied: bool,
}

/// What one `optimize()` pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalingOptimization {
    pub actions: Vec<(ScalingRoutine, ScaleAction)>,
    /// Routines that failed, with the error text.
    pub failures: Vec<(ScalingRoutine, String)>,
}

impl ScalingOptimization {
    pub fn recommendations(&self) -> Vec<String> {
        let mut recs: Vec<String> = self
            .actions
            .iter()
            .map(|(routine, action)| format!("{routine:?} scaling applied {action:?}"))
            .collect();
        recs.extend(
            self.failures
                .iter()
                .map(|(routine, err)| format!("{routine:?} scaling failed: {err}")),
        );
        recs
    }
}

/// Callback type for performing scaling actions against real
/// infrastructure.
pub type ScaleCallback = Arc<dyn Fn(ScaleAction) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

struct ScaleState {
    instances: u32,
    cpu_millicores: u32,
    memory_mb: u32,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    /// Samples observed since the last vertical resize.
    since_resize: usize,
    trigger_fired: HashMap<String, Instant>,
    samples: VecDeque<MetricSnapshot>,
    history: VecDeque<AppliedAction>,
}

/// One step up if every sample sits at or above `threshold`, one step down
/// if every sample sits at or below half of it.
fn step_limit(
    window: &[MetricSnapshot],
    utilization: fn(&MetricSnapshot) -> f64,
    threshold: f64,
    current: u32,
    step: u32,
    (min, max): (u32, u32),
) -> u32 {
    if window.iter().all(|s| utilization(s) >= threshold) {
        current.saturating_add(step).min(max)
    } else if window.iter().all(|s| utilization(s) <= threshold / 2.0) {
        current.saturating_sub(step).max(min)
    } else {
        current
    }
}

fn cooled_down(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    last.is_none_or(|at| now.duration_since(at) >= cooldown)
}

pub struct Autoscaler {
    config: RwLock<ScalingConfig>,
    state: Mutex<ScaleState>,
    scale_fn: Option<ScaleCallback>,
}

impl Autoscaler {
    pub fn new(config: ScalingConfig) -> Self {
        let state = ScaleState {
            instances: config.initial_instances,
            cpu_millicores: config.vertical.min_cpu_millicores,
            memory_mb: config.vertical.min_memory_mb,
            last_scale_up: None,
            last_scale_down: None,
            since_resize: 0,
            trigger_fired: HashMap::new(),
            samples: VecDeque::new(),
            history: VecDeque::new(),
        };
        Self {
            config: RwLock::new(config),
            state: Mutex::new(state),
            scale_fn: None,
        }
    }

    /// Set the callback used to perform scaling.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    /// Feed a metric sample. Repeats of the newest timestamp are ignored.
    pub fn observe(&self, snapshot: MetricSnapshot) {
        let mut state = self.state.lock();
        if state.samples.back().is_some_and(|s| s.timestamp >= snapshot.timestamp) {
            return;
        }
        state.samples.push_back(snapshot);
        if state.samples.len() > MAX_SAMPLES {
            state.samples.pop_front();
        }
        state.since_resize += 1;
    }

    /// Horizontal decision for `snapshot`. Stamps the cooldown window when
    /// it decides to scale.
    pub fn evaluate(&self, snapshot: &MetricSnapshot) -> ScaleDecision {
        let config = self.config.read().clone();
        let now = Instant::now();
        let mut state = self.state.lock();
        let current = state.instances;

        // Out-of-bounds counts are corrected regardless of load.
        if current < config.min_instances || current > config.max_instances {
            let clamped = current.clamp(config.min_instances, config.max_instances);
            debug!(from = current, to = clamped, "instance count outside bounds");
            return ScaleDecision::ScaleTo(clamped);
        }

        let pressure = (snapshot.cpu_utilization / config.cpu_target)
            .max(snapshot.memory_utilization / config.memory_target);

        // Scale up: pressure above target with 10% headroom.
        if pressure > 1.1
            && cooled_down(
                state.last_scale_up,
                Duration::from_secs(config.scale_up_cooldown_seconds),
                now,
            )
        {
            let desired = ((current.max(1) as f64) * pressure).ceil() as u32;
            let clamped = desired.min(config.max_instances);
            if clamped > current {
                state.last_scale_up = Some(now);
                debug!(
                    from = current,
                    to = clamped,
                    cpu = snapshot.cpu_utilization,
                    memory = snapshot.memory_utilization,
                    pressure,
                    "scaling up"
                );
                return ScaleDecision::ScaleTo(clamped);
            }
        }

        // Scale down: pressure well below target.
        if pressure < 0.5
            && current > config.min_instances
            && cooled_down(
                state.last_scale_down,
                Duration::from_secs(config.scale_down_cooldown_seconds),
                now,
            )
        {
            let desired = ((current as f64) * pressure).ceil().max(1.0) as u32;
            let clamped = desired.max(config.min_instances);
            if clamped < current {
                state.last_scale_down = Some(now);
                debug!(from = current, to = clamped, pressure, "scaling down");
                return ScaleDecision::ScaleTo(clamped);
            }
        }

        ScaleDecision::NoChange
    }

    /// Run every enabled routine once. Each routine's failure is logged
    /// and recorded; the remaining routines still run.
    pub async fn optimize(&self) -> ScalingOptimization {
        let config = self.config.read().clone();
        let mut result = ScalingOptimization::default();

        if config.horizontal_enabled {
            let latest = self.state.lock().samples.back().copied();
            if let Some(snapshot) = latest
                && let ScaleDecision::ScaleTo(instances) = self.evaluate(&snapshot)
            {
                self.run_action(ScalingRoutine::Horizontal, ScaleAction::ScaleTo { instances }, &mut result)
                    .await;
            }
        }

        if config.vertical.enabled
            && let Some(action) = self.evaluate_vertical(&config)
        {
            self.run_action(ScalingRoutine::Vertical, action, &mut result).await;
        }

        if config.predictive.enabled {
            match self.evaluate_predictive(&config) {
                Ok(actions) => {
                    for action in actions {
                        self.run_action(ScalingRoutine::Predictive, action, &mut result).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "predictive scaling failed");
                    result.failures.push((ScalingRoutine::Predictive, e.to_string()));
                }
            }
        }

        result
    }

    fn evaluate_vertical(&self, config: &ScalingConfig) -> Option<ScaleAction> {
        let v = &config.vertical;
        let mut state = self.state.lock();
        if state.since_resize < v.sustained_samples || state.samples.len() < v.sustained_samples {
            return None;
        }
        let window: Vec<MetricSnapshot> = state.samples.iter().rev().take(v.sustained_samples).copied().collect();
        let threshold = v.resize_threshold;

        let cpu = step_limit(
            &window,
            |s| s.cpu_utilization,
            threshold,
            state.cpu_millicores,
            v.cpu_step_millicores,
            (v.min_cpu_millicores, v.max_cpu_millicores),
        );
        let memory = step_limit(
            &window,
            |s| s.memory_utilization,
            threshold,
            state.memory_mb,
            v.memory_step_mb,
            (v.min_memory_mb, v.max_memory_mb),
        );

        if cpu == state.cpu_millicores && memory == state.memory_mb {
            return None;
        }
        state.since_resize = 0;
        debug!(
            cpu_from = state.cpu_millicores,
            cpu_to = cpu,
            memory_from = state.memory_mb,
            memory_to = memory,
            "vertical resize"
        );
        Some(ScaleAction::Resize {
            cpu_millicores: cpu,
            memory_mb: memory,
        })
    }

    fn evaluate_predictive(&self, config: &ScalingConfig) -> anyhow::Result<Vec<ScaleAction>> {
        let p = &config.predictive;
        let now = Instant::now();
        let horizon = Duration::from_secs(p.horizon_seconds);
        let mut state = self.state.lock();
        if state.samples.len() < p.min_history {
            return Ok(Vec::new());
        }
        let samples: Vec<MetricSnapshot> = state.samples.iter().copied().collect();

        let mut actions = Vec::new();
        let mut planned = state.instances;
        for trigger in &p.triggers {
            if state
                .trigger_fired
                .get(&trigger.name)
                .is_some_and(|at| now.duration_since(*at) < horizon)
            {
                continue;
            }
            let Some(predicted) = forecast(p.model, &samples, trigger.metric, horizon.as_secs_f64(), p.smoothing_alpha)
            else {
                continue;
            };
            if !predicted.is_finite() {
                anyhow::bail!("forecast for trigger `{}` is not finite", trigger.name);
            }
            if predicted < trigger.threshold {
                continue;
            }
            let target = planned.saturating_add(trigger.scale_by).min(config.max_instances);
            if target <= planned {
                continue;
            }
            info!(
                trigger = %trigger.name,
                metric = %trigger.metric,
                predicted,
                threshold = trigger.threshold,
                to = target,
                "predictive scale-up"
            );
            state.trigger_fired.insert(trigger.name.clone(), now);
            planned = target;
            actions.push(ScaleAction::Predictive {
                trigger: trigger.name.clone(),
                instances: target,
                lead_time: Duration::from_secs(trigger.lead_time_seconds),
            });
        }
        Ok(actions)
    }

    async fn run_action(&self, routine: ScalingRoutine, action: ScaleAction, result: &mut ScalingOptimization) {
        let outcome = match &self.scale_fn {
            Some(scale_fn) => scale_fn(action.clone()).await,
            None => Ok(()),
        };

        let applied = outcome.is_ok();
        {
            let mut state = self.state.lock();
            if applied {
                match &action {
                    ScaleAction::ScaleTo { instances } | ScaleAction::Predictive { instances, .. } => {
                        state.instances = *instances;
                    }
                    ScaleAction::Resize {
                        cpu_millicores,
                        memory_mb,
                    } => {
                        state.cpu_millicores = *cpu_millicores;
                        state.memory_mb = *memory_mb;
                    }
                }
            }
            state.history.push_back(AppliedAction {
                routine,
                action: action.clone(),
                at: epoch_millis(),
                applied,
            });
            if state.history.len() > MAX_HISTORY {
                state.history.pop_front();
            }
        }

        match outcome {
            Ok(()) => {
                info!(?routine, ?action, "scaling action applied");
                result.actions.push((routine, action));
            }
            Err(e) => {
                warn!(?routine, ?action, error = %e, "scaling action failed");
                result.failures.push((routine, e.to_string()));
            }
        }
    }

    /// Validate and apply a new configuration.
    pub fn reconfigure(&self, config: ScalingConfig) -> ConfigResult<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    pub fn config(&self) -> ScalingConfig {
        self.config.read().clone()
    }

    pub fn instances(&self) -> u32 {
        self.state.lock().instances
    }

    /// Current per-instance `(cpu_millicores, memory_mb)`.
    pub fn resources(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.cpu_millicores, state.memory_mb)
    }

    pub fn history(&self) -> Vec<AppliedAction> {
        self.state.lock().history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridtune_core::{MetricKind, PredictiveTrigger};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> ScalingConfig {
        ScalingConfig {
            min_instances: 1,
            max_instances: 10,
            initial_instances: 2,
            scale_up_cooldown_seconds: 0,
            scale_down_cooldown_seconds: 0,
            ..Default::default()
        }
    }

    fn snapshot(cpu: f64, memory: f64) -> MetricSnapshot {
        MetricSnapshot {
            timestamp: epoch_millis(),
            cpu_utilization: cpu,
            memory_utilization: memory,
            ..Default::default()
        }
    }

    fn series(values: &[f64]) -> Vec<MetricSnapshot> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricSnapshot {
                timestamp: 1_000_000 + i as u64 * 60_000,
                cpu_utilization: *v,
                memory_utilization: *v,
                ..Default::default()
            })
            .collect()
    }

    fn recording_callback() -> (ScaleCallback, Arc<Mutex<Vec<ScaleAction>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ScaleCallback = Arc::new(move |action: ScaleAction| -> BoxFuture {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().push(action);
                Ok(())
            })
        });
        (callback, seen)
    }

    #[test]
    fn scale_up_when_above_target() {
        let scaler = Autoscaler::new(config());
        // cpu 1.3 / 0.7 = 1.86x pressure
        let decision = scaler.evaluate(&snapshot(1.3, 0.1));
        assert_eq!(decision, ScaleDecision::ScaleTo(4));
    }

    #[test]
    fn memory_pressure_also_scales_up() {
        let scaler = Autoscaler::new(config());
        let decision = scaler.evaluate(&snapshot(0.1, 1.2));
        assert!(matches!(decision, ScaleDecision::ScaleTo(n) if n > 2));
    }

    #[test]
    fn scale_down_when_below_target() {
        let mut cfg = config();
        cfg.initial_instances = 4;
        let scaler = Autoscaler::new(cfg);
        let decision = scaler.evaluate(&snapshot(0.14, 0.08));
        assert!(matches!(decision, ScaleDecision::ScaleTo(n) if n < 4));
    }

    #[test]
    fn no_change_when_near_target() {
        let scaler = Autoscaler::new(config());
        assert_eq!(scaler.evaluate(&snapshot(0.7, 0.6)), ScaleDecision::NoChange);
    }

    #[test]
    fn respects_max_instances() {
        let mut cfg = config();
        cfg.max_instances = 5;
        cfg.initial_instances = 1;
        let scaler = Autoscaler::new(cfg);
        assert_eq!(scaler.evaluate(&snapshot(7.0, 0.0)), ScaleDecision::ScaleTo(5));
    }

    #[test]
    fn respects_min_instances() {
        let mut cfg = config();
        cfg.min_instances = 2;
        cfg.initial_instances = 4;
        let scaler = Autoscaler::new(cfg);
        let decision = scaler.evaluate(&snapshot(0.01, 0.01));
        assert_eq!(decision, ScaleDecision::ScaleTo(2));
    }

    #[test]
    fn out_of_bounds_count_is_clamped() {
        let scaler = Autoscaler::new(config());
        scaler.reconfigure(ScalingConfig {
            min_instances: 3,
            initial_instances: 3,
            ..config()
        })
        .unwrap();
        assert_eq!(scaler.evaluate(&snapshot(0.7, 0.7)), ScaleDecision::ScaleTo(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocks_repeat_scale_up() {
        let mut cfg = config();
        cfg.scale_up_cooldown_seconds = 60;
        let scaler = Autoscaler::new(cfg);

        scaler.observe(snapshot(1.3, 0.1));
        let first = scaler.optimize().await;
        assert_eq!(first.actions.len(), 1);
        assert_eq!(scaler.instances(), 4);

        assert_eq!(scaler.evaluate(&snapshot(1.3, 0.1)), ScaleDecision::NoChange);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(matches!(scaler.evaluate(&snapshot(1.3, 0.1)), ScaleDecision::ScaleTo(n) if n > 4));
    }

    #[tokio::test]
    async fn optimize_applies_through_callback() {
        let (callback, seen) = recording_callback();
        let scaler = Autoscaler::new(config()).with_scale_fn(callback);
        scaler.observe(snapshot(1.3, 0.1));

        let result = scaler.optimize().await;
        assert_eq!(result.actions, vec![(ScalingRoutine::Horizontal, ScaleAction::ScaleTo { instances: 4 })]);
        assert_eq!(seen.lock().as_slice(), &[ScaleAction::ScaleTo { instances: 4 }]);
        assert_eq!(scaler.history().len(), 1);
        assert!(scaler.history()[0].applied);
    }

    #[tokio::test]
    async fn failed_callback_keeps_state_and_other_routines_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: ScaleCallback = Arc::new(move |action: ScaleAction| -> BoxFuture {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match action {
                    ScaleAction::ScaleTo { .. } => Err(anyhow::anyhow!("provider unavailable")),
                    _ => Ok(()),
                }
            })
        });

        let mut cfg = config();
        cfg.vertical.enabled = true;
        cfg.vertical.sustained_samples = 2;
        let scaler = Autoscaler::new(cfg).with_scale_fn(callback);
        for s in series(&[0.95, 0.95]) {
            scaler.observe(s);
        }

        let result = scaler.optimize().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].0, ScalingRoutine::Horizontal);
        assert_eq!(scaler.instances(), 2);
        assert_eq!(scaler.resources(), (500, 512));
        assert!(!scaler.history()[0].applied);
    }

    #[tokio::test]
    async fn vertical_needs_sustained_samples() {
        let mut cfg = config();
        cfg.horizontal_enabled = false;
        cfg.vertical.enabled = true;
        let scaler = Autoscaler::new(cfg);

        for s in series(&[0.9, 0.5, 0.9]) {
            scaler.observe(s);
        }
        assert!(scaler.optimize().await.actions.is_empty());

        for s in series(&[0.9, 0.5, 0.9, 0.9, 0.9, 0.9]).into_iter().skip(3) {
            scaler.observe(s);
        }
        let result = scaler.optimize().await;
        assert_eq!(
            result.actions,
            vec![(
                ScalingRoutine::Vertical,
                ScaleAction::Resize {
                    cpu_millicores: 500,
                    memory_mb: 512
                }
            )]
        );
        // the window restarts after a resize
        assert!(scaler.optimize().await.actions.is_empty());
    }

    #[tokio::test]
    async fn vertical_never_drops_below_minimum() {
        let mut cfg = config();
        cfg.horizontal_enabled = false;
        cfg.vertical.enabled = true;
        let scaler = Autoscaler::new(cfg);
        for s in series(&[0.05, 0.05, 0.05]) {
            scaler.observe(s);
        }
        assert!(scaler.optimize().await.actions.is_empty());
        assert_eq!(scaler.resources(), (250, 256));
    }

    fn predictive_config(threshold: f64) -> ScalingConfig {
        let mut cfg = config();
        cfg.horizontal_enabled = false;
        cfg.predictive.enabled = true;
        cfg.predictive.min_history = 4;
        cfg.predictive.horizon_seconds = 300;
        cfg.predictive.triggers = vec![PredictiveTrigger {
            name: "cpu-ramp".to_string(),
            metric: MetricKind::CpuUtilization,
            threshold,
            lead_time_seconds: 120,
            scale_by: 2,
        }];
        cfg
    }

    #[tokio::test]
    async fn predictive_fires_ahead_of_crossing() {
        let (callback, seen) = recording_callback();
        let scaler = Autoscaler::new(predictive_config(0.8)).with_scale_fn(callback);
        // +0.1 per minute, 0.4 now, 0.9 in five minutes
        for s in series(&[0.1, 0.2, 0.3, 0.4]) {
            scaler.observe(s);
        }

        let result = scaler.optimize().await;
        assert_eq!(result.actions.len(), 1);
        assert_eq!(
            seen.lock()[0],
            ScaleAction::Predictive {
                trigger: "cpu-ramp".to_string(),
                instances: 4,
                lead_time: Duration::from_secs(120),
            }
        );
        assert_eq!(scaler.instances(), 4);

        // one firing per horizon
        assert!(scaler.optimize().await.actions.is_empty());
    }

    #[tokio::test]
    async fn predictive_waits_for_history() {
        let scaler = Autoscaler::new(predictive_config(0.8));
        for s in series(&[0.5, 0.9, 1.3]) {
            scaler.observe(s);
        }
        assert!(scaler.optimize().await.actions.is_empty());
    }

    #[tokio::test]
    async fn predictive_quiet_below_threshold() {
        let scaler = Autoscaler::new(predictive_config(0.95));
        for s in series(&[0.1, 0.2, 0.3, 0.4]) {
            scaler.observe(s);
        }
        assert!(scaler.optimize().await.actions.is_empty());
    }

    #[test]
    fn observe_skips_stale_samples() {
        let scaler = Autoscaler::new(config());
        let s = snapshot(0.5, 0.5);
        scaler.observe(s);
        scaler.observe(s);
        assert_eq!(scaler.state.lock().samples.len(), 1);
    }

    #[test]
    fn reconfigure_rejects_invalid() {
        let scaler = Autoscaler::new(config());
        let bad = ScalingConfig {
            min_instances: 5,
            max_instances: 2,
            ..config()
        };
        assert!(scaler.reconfigure(bad).is_err());
        assert_eq!(scaler.config().max_instances, 10);
    }
}
