//! Scaling arithmetic shared by the proactive and reactive evaluators.
//!
//! Everything here is pure: the controller feeds in per-instance metric
//! values, instance counts and timestamps, and gets back instance counts
//! and yes/no answers.

use std::time::Duration;

use chrono::{DateTime, Utc};

use prescale_core::config::AutoscalerConfig;
use prescale_core::{ScalingDirection, ScalingHistory};

/// Thresholds and bounds that drive every scaling decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    /// Per-instance target value of the metric.
    pub target_value: f64,
    pub breach_tolerance: f64,
    pub min_instances: u32,
    pub max_instances: u32,
    pub downscale_max_percentage: Option<f64>,
    pub downscale_cooldown_mins: u32,
    pub downscale_after_proactive_scaleup_cooldown_mins: u32,
}

impl ScalingPolicy {
    pub fn from_config(config: &AutoscalerConfig) -> Self {
        Self {
            target_value: config.metrics.target_value,
            breach_tolerance: config.metrics.breach_tolerance,
            min_instances: config.strategy.min_instances,
            max_instances: config.strategy.max_instances,
            downscale_max_percentage: config.strategy.downscale_max_percentage,
            downscale_cooldown_mins: config.strategy.downscale_cooldown_mins,
            downscale_after_proactive_scaleup_cooldown_mins: config
                .strategy
                .downscale_after_proactive_scaleup_cooldown_mins,
        }
    }

    /// Which side of the hysteresis band `value` falls on, if outside it.
    pub fn breach(&self, value: f64) -> Option<ScalingDirection> {
        if value > self.target_value + self.breach_tolerance {
            Some(ScalingDirection::Up)
        } else if value < self.target_value - self.breach_tolerance {
            Some(ScalingDirection::Down)
        } else {
            None
        }
    }

    /// `min(ceil(current * value / target), max_instances)`, kept within
    /// bounds.
    pub fn scale_up_amount(&self, current: u32, value: f64) -> u32 {
        let desired = self.proportional(current, value).min(self.max_instances);
        self.clamp(desired)
    }

    /// `max(ceil(current * value / target), min_instances, [pct floor])`,
    /// kept within bounds.
    pub fn scale_down_amount(&self, current: u32, value: f64) -> u32 {
        let mut desired = self.proportional(current, value).max(self.min_instances);
        if let Some(pct) = self.downscale_max_percentage {
            let floor = (f64::from(current) * pct / 100.0).ceil() as u32;
            desired = desired.max(floor);
        }
        self.clamp(desired)
    }

    pub fn clamp(&self, instances: u32) -> u32 {
        instances.clamp(self.min_instances, self.max_instances.max(self.min_instances))
    }

    /// Whether `instances` lies within `[min_instances, max_instances]`.
    pub fn within_bounds(&self, instances: u32) -> bool {
        instances >= self.min_instances && instances <= self.max_instances
    }

    /// Cooldown for a reactive downscale. A proactive scale-up as the latest
    /// decision gets the longer window so the reactive side does not undo it
    /// before the predicted load arrives.
    pub fn reactive_downscale_cooldown(&self, history: &ScalingHistory) -> u32 {
        match history.last() {
            Some(last) if last.is_proactive_scale_up() => {
                self.downscale_after_proactive_scaleup_cooldown_mins
            }
            _ => self.downscale_cooldown_mins,
        }
    }

    fn proportional(&self, current: u32, value: f64) -> u32 {
        // Saturating float-to-int cast: negative values become 0.
        (f64::from(current) * value / self.target_value).ceil() as u32
    }
}

/// Aggregate metric value divided by the instance count.
pub fn per_instance(aggregate: f64, instances: u32) -> f64 {
    if instances == 0 {
        return aggregate;
    }
    aggregate / f64::from(instances)
}

/// Whether a downscale may happen: there is no previous decision, or at
/// least `cooldown_mins` whole minutes have passed since it.
pub fn cooldown_elapsed(
    last_decision: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown_mins: u32,
) -> bool {
    match last_decision {
        None => true,
        Some(last) => (now - last).num_minutes() >= i64::from(cooldown_mins),
    }
}

/// Time to sleep before the next tick: `max(0, interval - elapsed)`.
pub fn pacing_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}
