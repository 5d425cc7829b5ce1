//! The metric-source contract and the registry that picks an
//! implementation from configuration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use prescale_core::{
    AutoscalerConfig, BoxFuture, CollaboratorResult, HttpClient, Instance, MetricKind,
    MetricSeries,
};

use crate::prometheus::{PrometheusClient, PrometheusSource};

/// Produces an aggregate metric series for the running instances.
///
/// Implementations fail with `NoInstances` when `instances` is empty and
/// with `NoData` when the backend has nothing for the range.
pub trait MetricSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn get_data<'a>(
        &'a self,
        instances: &'a [Instance],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'a, CollaboratorResult<MetricSeries>>;
}

/// Build the metric source selected by `metrics.source`.
pub fn build_metric_source(config: &AutoscalerConfig, http: HttpClient) -> Arc<dyn MetricSource> {
    let client = PrometheusClient::new(&config.prometheus.url, http);
    let step_secs = u64::from(config.metrics.step_size_mins) * 60;
    let params = &config.metrics.params;

    let source = match config.metrics.source {
        MetricKind::CpuUsage => PrometheusSource::cpu_usage(
            client,
            step_secs,
            &config.workload.deployment,
            params.get("usage_metric").map(String::as_str),
            params.get("requests_metric").map(String::as_str),
        ),
        MetricKind::RequestsPerSecond => PrometheusSource::requests_per_second(
            client,
            step_secs,
            params.get("cluster_name").map(String::as_str).unwrap_or_default(),
        ),
        MetricKind::Latency => PrometheusSource::latency(
            client,
            step_secs,
            params.get("cluster_name").map(String::as_str).unwrap_or_default(),
        ),
    };

    info!(
        source = %config.metrics.source,
        prometheus = %config.prometheus.url,
        step_secs,
        "metric source selected"
    );
    Arc::new(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(source: &str, params: &str) -> AutoscalerConfig {
        AutoscalerConfig::from_toml_str(&format!(
            r#"
[workload]
deployment = "webapp"
container = "app"

[prometheus]
url = "http://prometheus:9090"

[metrics]
source = "{source}"
target_value = 0.5
breach_tolerance = 0.05
min_train_history_hours = 1
max_train_history_hours = 2
step_size_mins = 2
[metrics.params]
{params}

[strategy]
min_instances = 1
max_instances = 5
downscale_cooldown_mins = 5
downscale_after_proactive_scaleup_cooldown_mins = 10
preempt_horizon_mins = 5
"#
        ))
        .unwrap()
    }

    #[test]
    fn registry_maps_kind_to_source() {
        let http = HttpClient::new(Duration::from_secs(1));

        let cpu = build_metric_source(&config("cpu_usage", ""), http.clone());
        assert_eq!(cpu.name(), "cpu_usage");

        let rps = build_metric_source(
            &config("requests_per_second", "cluster_name = \"c\""),
            http.clone(),
        );
        assert_eq!(rps.name(), "requests_per_second");

        let latency = build_metric_source(&config("latency", "cluster_name = \"c\""), http);
        assert_eq!(latency.name(), "latency");
    }
}
