use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use prescale_core::{BoxFuture, CollaboratorResult, MetricSeries};

/// Fits a model on a training window.
pub trait Forecaster: Send + Sync {
    fn name(&self) -> &str;

    /// Train on `series` (regular grid of `step`) for forecasts
    /// `horizon_steps` points long.
    fn train<'a>(
        &'a self,
        series: &'a MetricSeries,
        step: TimeDelta,
        horizon_steps: usize,
    ) -> BoxFuture<'a, CollaboratorResult<Box<dyn TrainedModel>>>;
}

/// A fitted model. Produces a forecast starting one step after the last
/// observation of the series it is given.
pub trait TrainedModel: Send + Sync {
    fn predict<'a>(
        &'a self,
        series: &'a MetricSeries,
        step: TimeDelta,
    ) -> BoxFuture<'a, CollaboratorResult<ForecastResult>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Predicted values on a fixed grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    start: DateTime<Utc>,
    step: TimeDelta,
    values: Vec<f64>,
}

impl ForecastResult {
    /// `values[i]` is the prediction at `start + i * step`.
    pub fn new(start: DateTime<Utc>, step: TimeDelta, values: Vec<f64>) -> Self {
        Self {
            start,
            step,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Timestamp of the last predicted point.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        let last = i32::try_from(self.values.len().checked_sub(1)?).ok()?;
        Some(self.start + self.step * last)
    }

    pub fn points(&self) -> Vec<ForecastPoint> {
        let mut ts = self.start;
        self.values
            .iter()
            .map(|&value| {
                let point = ForecastPoint {
                    timestamp: ts,
                    value,
                };
                ts += self.step;
                point
            })
            .collect()
    }

    /// Prediction at `ts`, interpolated between grid points. `None` outside
    /// the predicted span.
    pub fn value_at(&self, ts: DateTime<Utc>) -> Option<f64> {
        let end = self.end()?;
        if ts < self.start || ts > end {
            return None;
        }
        let step_ms = self.step.num_milliseconds();
        if step_ms <= 0 {
            return (ts == self.start).then(|| self.values[0]);
        }

        let offset_ms = (ts - self.start).num_milliseconds();
        let idx = usize::try_from(offset_ms / step_ms).ok()?;
        let left = *self.values.get(idx)?;
        match self.values.get(idx + 1) {
            Some(&right) => {
                let frac = (offset_ms % step_ms) as f64 / step_ms as f64;
                Some(left + (right - left) * frac)
            }
            None => Some(left),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::minutes(min)
    }

    fn forecast() -> ForecastResult {
        ForecastResult::new(at(1), TimeDelta::minutes(1), vec![10.0, 20.0, 40.0])
    }

    #[test]
    fn value_at_grid_points() {
        let f = forecast();
        assert_eq!(f.value_at(at(1)), Some(10.0));
        assert_eq!(f.value_at(at(3)), Some(40.0));
        assert_eq!(f.end(), Some(at(3)));
    }

    #[test]
    fn value_at_interpolates() {
        let f = forecast();
        let mid = at(2) + TimeDelta::seconds(30);
        assert_eq!(f.value_at(mid), Some(30.0));
    }

    #[test]
    fn value_at_outside_span() {
        let f = forecast();
        assert_eq!(f.value_at(at(0)), None);
        assert_eq!(f.value_at(at(4)), None);
        assert_eq!(ForecastResult::new(at(1), TimeDelta::minutes(1), vec![]).value_at(at(1)), None);
    }

    #[test]
    fn points_follow_step() {
        let points = forecast().points();
        assert_eq!(points.len(), 3);
        assert_eq!(points[2].timestamp, at(3));
        assert_eq!(points[2].value, 40.0);
    }
}
