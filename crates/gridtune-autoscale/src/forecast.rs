//! Forecast models for predictive scaling.

use gridtune_core::{ForecastModel, MetricKind, MetricSnapshot};

/// Forecast `metric` `horizon_secs` past the newest sample.
///
/// Returns `None` with fewer than two samples.
pub fn forecast(
    model: ForecastModel,
    samples: &[MetricSnapshot],
    metric: MetricKind,
    horizon_secs: f64,
    alpha: f64,
) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let t0 = samples[0].timestamp;
    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| ((s.timestamp.saturating_sub(t0)) as f64 / 1000.0, s.value(metric)))
        .collect();

    match model {
        ForecastModel::Linear => {
            let last_x = points[points.len() - 1].0;
            linear(&points, last_x + horizon_secs)
        }
        ForecastModel::ExponentialSmoothing => {
            let span = points[points.len() - 1].0 - points[0].0;
            let mean_interval = span / (points.len() - 1) as f64;
            let steps = if mean_interval > 0.0 {
                horizon_secs / mean_interval
            } else {
                1.0
            };
            let values: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
            exponential_smoothing(&values, alpha, steps)
        }
    }
}

/// Least-squares line through `points`, evaluated at `at`.
///
/// Samples that all share one instant yield their mean.
pub fn linear(points: &[(f64, f64)], at: f64) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in points {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x) * (x - mean_x);
    }
    if den == 0.0 {
        return Some(mean_y);
    }
    let slope = num / den;
    Some(mean_y + slope * (at - mean_x))
}

/// Double exponential smoothing (level and trend share `alpha`),
/// projected `steps` samples ahead.
pub fn exponential_smoothing(values: &[f64], alpha: f64, steps: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mut level = values[0];
    let mut trend = values[1] - values[0];
    for &y in &values[1..] {
        let prev_level = level;
        level = alpha * y + (1.0 - alpha) * (level + trend);
        trend = alpha * (level - prev_level) + (1.0 - alpha) * trend;
    }
    Some(level + steps * trend)
}
