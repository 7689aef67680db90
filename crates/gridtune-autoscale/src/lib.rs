//! gridtune-autoscale — metrics-driven scaling.
//!
//! The [`Autoscaler`] keeps a short history of [`MetricSnapshot`]s and, on
//! each `optimize()` pass, runs three independent routines. Each one is
//! switched on by configuration and a failure in one never stops the next.
//!
//! # Horizontal
//!
//! ```text
//! pressure = max(cpu / cpu_target, memory / memory_target)
//!
//! if pressure > 1.1 and scale-up cooldown elapsed:
//!     ScaleTo(min(ceil(instances * pressure), max_instances))
//!
//! if pressure < 0.5 and scale-down cooldown elapsed:
//!     ScaleTo(max(ceil(instances * pressure), min_instances))
//! ```
//!
//! # Vertical
//!
//! When the last `sustained_samples` snapshots all sit at or above
//! `resize_threshold` (or all at or below half of it), per-instance CPU and
//! memory limits move one step within their configured bounds.
//!
//! # Predictive
//!
//! Each trigger forecasts its metric `horizon_seconds` ahead with the
//! configured model. A forecast at or above the trigger's threshold issues
//! a pre-emptive scale-up carrying the trigger's lead time.
//!
//! Actions are applied through an async [`ScaleCallback`] so the caller
//! decides what "add an instance" means.
//!
//! [`MetricSnapshot`]: gridtune_core::MetricSnapshot

pub mod forecast;
pub mod scaler;

pub use scaler::{
    AppliedAction, Autoscaler, ScaleAction, ScaleCallback, ScaleDecision, ScalingOptimization,
    ScalingRoutine,
};
