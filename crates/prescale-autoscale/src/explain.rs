//! Human-readable explanations attached to logs and notifications.

use chrono::{DateTime, Utc};

use prescale_core::{ScalingDirection, ScalingKind};

const FORECAST_ONLY_PREFIX: &str = "Forecast only, not applied: ";

pub fn reactive_metric(now: DateTime<Utc>, instances: u32, value: f64) -> String {
    format!(
        "Average metric value at current time {now} is {value:.3} for {instances} instances"
    )
}

pub fn proactive_metric(
    prediction_time: DateTime<Utc>,
    now: DateTime<Utc>,
    instances: u32,
    current_value: f64,
    predicted_value: f64,
) -> String {
    format!(
        "Average metric value at prediction time {prediction_time} is {predicted_value:.3} \
         for current number of {instances} instances, whilst at current time {now} the \
         metric value is {current_value:.3} for {instances} instances"
    )
}

pub fn out_of_bounds(now: DateTime<Utc>, instances: u32, min: u32, max: u32) -> String {
    format!("Instance count {instances} at {now} is outside the bounds [{min}, {max}]")
}

pub fn scaling(
    kind: ScalingKind,
    from: u32,
    to: u32,
    now: DateTime<Utc>,
    forecast_only: bool,
) -> String {
    let prefix = if forecast_only { FORECAST_ONLY_PREFIX } else { "" };
    let direction = ScalingDirection::between(from, to);
    format!("{prefix}{kind} scale {direction} to {to} instances from current {from} instances at {now}")
}
