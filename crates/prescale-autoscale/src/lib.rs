//! prescale-autoscale: proactive and reactive scaling of one workload.
//!
//! # Scaling Algorithm
//!
//! ```text
//! value     = latest aggregate metric / running instances
//! predicted = forecast(now + preempt_horizon) / running instances
//! band      = [target - tolerance, target + tolerance]
//!
//! proactive: predicted above band  → ScaleTo(min(ceil(n * predicted / target), max))
//!            predicted below band  → ScaleTo(max(ceil(n * predicted / target), min, [pct floor]))
//!                                    (opt-in, cooldown-gated)
//! reactive:  same arithmetic on value, skipped when proactive already scaled;
//!            downscale waits out the cooldown, longer after a proactive scale-up
//! ```
//!
//! Scale-ups are never gated; scale-downs always are. Every target is kept
//! within `[min_instances, max_instances]`.

pub mod controller;
pub mod engine;
pub mod explain;
pub mod notify;

pub use controller::{
    Collaborators, Controller, ControllerState, ProactiveOutcome, TickOutcome, TickPlan,
};
pub use engine::{cooldown_elapsed, pacing_delay, per_instance, ScalingPolicy};
pub use notify::{LogNotifier, Notifier, ScalingEvent, WebhookNotifier};
