//! Holt double exponential smoothing.
//!
//! Level and trend are smoothed with `alpha` and `beta`:
//!
//! ```text
//! level_t = alpha * y_t + (1 - alpha) * (level_{t-1} + trend_{t-1})
//! trend_t = beta * (level_t - level_{t-1}) + (1 - beta) * trend_{t-1}
//! y_{t+h} = level_t + h * trend_t
//! ```
//!
//! Training picks the `(alpha, beta)` pair with the lowest one-step-ahead
//! squared error over the training window.

use chrono::TimeDelta;
use tracing::debug;

use prescale_core::{BoxFuture, CollaboratorError, CollaboratorResult, MetricSeries};

use crate::model::{ForecastResult, Forecaster, TrainedModel};

/// Fewest points that identify both level and trend.
const MIN_POINTS: usize = 3;

pub struct HoltForecaster {
    grid: Vec<f64>,
}

impl HoltForecaster {
    /// Search `alpha` and `beta` over 0.1, 0.2, … 0.9.
    pub fn new() -> Self {
        Self::with_grid((1..=9).map(|i| f64::from(i) / 10.0).collect())
    }

    /// Search both parameters over `grid`. Values outside `(0, 1]` are
    /// ignored.
    pub fn with_grid(grid: Vec<f64>) -> Self {
        Self {
            grid: grid.into_iter().filter(|g| *g > 0.0 && *g <= 1.0).collect(),
        }
    }
}

impl Default for HoltForecaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Forecaster for HoltForecaster {
    fn name(&self) -> &str {
        "holt"
    }

    fn train<'a>(
        &'a self,
        series: &'a MetricSeries,
        _step: TimeDelta,
        horizon_steps: usize,
    ) -> BoxFuture<'a, CollaboratorResult<Box<dyn TrainedModel>>> {
        Box::pin(async move {
            if horizon_steps == 0 {
                return Err(CollaboratorError::TrainingFailed(
                    "forecast horizon must be at least one step".to_string(),
                ));
            }
            if series.len() < MIN_POINTS {
                return Err(CollaboratorError::TrainingFailed(format!(
                    "need at least {MIN_POINTS} points, got {}",
                    series.len()
                )));
            }
            if self.grid.is_empty() {
                return Err(CollaboratorError::TrainingFailed(
                    "empty parameter grid".to_string(),
                ));
            }

            let values: Vec<f64> = series.samples().iter().map(|s| s.value).collect();
            let grid = self.grid.clone();
            let (alpha, beta, sse) = tokio::task::spawn_blocking(move || grid_search(&values, &grid))
                .await
                .map_err(|e| CollaboratorError::TrainingFailed(e.to_string()))?;

            debug!(alpha, beta, sse, points = series.len(), horizon_steps, "holt model trained");
            Ok(Box::new(HoltModel {
                alpha,
                beta,
                horizon_steps,
            }) as Box<dyn TrainedModel>)
        })
    }
}

fn grid_search(values: &[f64], grid: &[f64]) -> (f64, f64, f64) {
    let mut best = (grid[0], grid[0], f64::INFINITY);
    for &alpha in grid {
        for &beta in grid {
            let sse = one_step_sse(values, alpha, beta);
            if sse < best.2 {
                best = (alpha, beta, sse);
            }
        }
    }
    best
}

fn one_step_sse(values: &[f64], alpha: f64, beta: f64) -> f64 {
    let mut level = values[0];
    let mut trend = values[1] - values[0];
    let mut sse = 0.0;
    for &y in &values[1..] {
        let err = y - (level + trend);
        sse += err * err;
        (level, trend) = smooth(level, trend, y, alpha, beta);
    }
    sse
}

fn smooth(level: f64, trend: f64, y: f64, alpha: f64, beta: f64) -> (f64, f64) {
    let next_level = alpha * y + (1.0 - alpha) * (level + trend);
    let next_trend = beta * (next_level - level) + (1.0 - beta) * trend;
    (next_level, next_trend)
}

/// Fitted smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoltModel {
    pub alpha: f64,
    pub beta: f64,
    pub horizon_steps: usize,
}

impl HoltModel {
    fn forecast(&self, series: &MetricSeries, step: TimeDelta) -> CollaboratorResult<ForecastResult> {
        if step <= TimeDelta::zero() {
            return Err(CollaboratorError::InferenceFailed(
                "step must be positive".to_string(),
            ));
        }
        let samples = series.samples();
        let last = samples.last().ok_or_else(|| {
            CollaboratorError::InferenceFailed("empty input series".to_string())
        })?;
        if samples.len() < 2 {
            return Err(CollaboratorError::InferenceFailed(
                "need at least 2 points to estimate a trend".to_string(),
            ));
        }

        let mut level = samples[0].value;
        let mut trend = samples[1].value - samples[0].value;
        for sample in &samples[1..] {
            (level, trend) = smooth(level, trend, sample.value, self.alpha, self.beta);
        }

        let values = (1..=self.horizon_steps)
            .map(|h| level + h as f64 * trend)
            .collect();
        Ok(ForecastResult::new(last.timestamp + step, step, values))
    }
}

impl TrainedModel for HoltModel {
    fn predict<'a>(
        &'a self,
        series: &'a MetricSeries,
        step: TimeDelta,
    ) -> BoxFuture<'a, CollaboratorResult<ForecastResult>> {
        Box::pin(async move { self.forecast(series, step) })
    }
}
