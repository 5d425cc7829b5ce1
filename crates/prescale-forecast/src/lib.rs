//! prescale-forecast: predicts where the metric is heading.
//!
//! Forecasting is split in two steps. [`Forecaster::train`] fits a model on
//! the training window (expensive, cached by the controller between
//! refreshes) and [`TrainedModel::predict`] projects the latest observations
//! forward (cheap, run every tick).

pub mod holt;
pub mod model;

pub use holt::{HoltForecaster, HoltModel};
pub use model::{ForecastPoint, ForecastResult, Forecaster, TrainedModel};
