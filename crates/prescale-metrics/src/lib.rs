//! prescale-metrics: where load numbers come from and where the
//! controller's mode goes.
//!
//! # Architecture
//!
//! ```text
//! MetricSource (trait)
//!   ├── PrometheusSource::cpu_usage()           ← aggregate CPU utilization
//!   ├── PrometheusSource::requests_per_second() ← envoy upstream RPS
//!   └── PrometheusSource::latency()             ← envoy p95 latency
//!
//! build_metric_source(config) → Arc<dyn MetricSource>   (once, at startup)
//!
//! TelemetryCollector (trait)
//!   ├── PushgatewayTelemetry → PUT scaling_mode gauge (text exposition)
//!   └── LogTelemetry         → tracing only
//! ```

pub mod exposition;
pub mod prometheus;
pub mod source;
pub mod telemetry;

pub use prometheus::{PrometheusClient, PrometheusSource, PromQuery};
pub use source::{MetricSource, build_metric_source};
pub use telemetry::{LogTelemetry, PushgatewayTelemetry, ScalingMode, TelemetryCollector};
