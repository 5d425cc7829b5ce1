//! Prometheus range queries.
//!
//! Each metric source is a PromQL template rendered against the current
//! instances and evaluated with `/api/v1/query_range`. The first series of
//! the matrix result becomes the aggregate [`MetricSeries`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use prescale_core::http::with_query;
use prescale_core::{
    BoxFuture, CollaboratorError, CollaboratorResult, HttpClient, Instance, MetricSeries, Sample,
};

use crate::source::MetricSource;

const DEFAULT_CPU_USAGE_METRIC: &str = "eagle_pod_container_resource_usage_cpu_cores";
const DEFAULT_CPU_REQUESTS_METRIC: &str = "eagle_pod_container_resource_requests_cpu_cores";

// ── Wire format ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

// ── Client ────────────────────────────────────────────────────────

/// Thin client for the Prometheus HTTP API.
#[derive(Clone)]
pub struct PrometheusClient {
    base_url: String,
    http: HttpClient,
}

impl PrometheusClient {
    pub fn new(base_url: &str, http: HttpClient) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Evaluate `query` over `[start, end]` at `step_secs` resolution.
    pub async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_secs: u64,
    ) -> CollaboratorResult<MetricSeries> {
        let start_param = start.timestamp().to_string();
        let end_param = end.timestamp().to_string();
        let step_param = step_secs.to_string();
        let uri = with_query(
            &format!("{}/api/v1/query_range", self.base_url),
            &[
                ("query", query),
                ("start", &start_param),
                ("end", &end_param),
                ("step", &step_param),
            ],
        )?;

        debug!(%query, %start, %end, step_secs, "prometheus range query");
        let response: QueryResponse = self.http.get_json(&uri).await?;
        parse_matrix(response)
    }
}

fn parse_matrix(response: QueryResponse) -> CollaboratorResult<MetricSeries> {
    if response.status != "success" {
        return Err(CollaboratorError::BackendUnavailable(format!(
            "prometheus query failed ({}): {}",
            response.error_type.as_deref().unwrap_or("unknown"),
            response.error.as_deref().unwrap_or("no error message"),
        )));
    }

    let data = response
        .data
        .ok_or_else(|| CollaboratorError::NoData("response carried no data".to_string()))?;
    if data.result_type != "matrix" {
        return Err(CollaboratorError::BackendUnavailable(format!(
            "expected a matrix result, got {}",
            data.result_type
        )));
    }

    let first = data
        .result
        .into_iter()
        .next()
        .ok_or_else(|| CollaboratorError::NoData("query returned no series".to_string()))?;
    debug!(labels = ?first.metric, points = first.values.len(), "prometheus series received");

    let series = MetricSeries::from_samples(first.values.into_iter().filter_map(|(ts, raw)| {
        let value = raw.parse::<f64>().ok()?;
        let secs = ts.floor();
        let nanos = ((ts - secs) * 1e9).round() as u32;
        let timestamp = DateTime::from_timestamp(secs as i64, nanos)?;
        Some(Sample::new(timestamp, value))
    }));

    if series.is_empty() {
        return Err(CollaboratorError::NoData(
            "series contained no finite samples".to_string(),
        ));
    }
    Ok(series)
}

// ── Query templates ───────────────────────────────────────────────

/// The PromQL behind each metric source.
#[derive(Debug, Clone, PartialEq)]
pub enum PromQuery {
    /// Aggregate CPU usage normalized by the mean per-pod CPU request.
    CpuUsage {
        deployment: String,
        usage_metric: String,
        requests_metric: String,
    },
    /// Envoy upstream request rate for a cluster.
    RequestsPerSecond { cluster_name: String },
    /// Envoy upstream p95 request time for a cluster.
    Latency { cluster_name: String },
}

impl PromQuery {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CpuUsage { .. } => "cpu_usage",
            Self::RequestsPerSecond { .. } => "requests_per_second",
            Self::Latency { .. } => "latency",
        }
    }

    /// Render the query for the given instances.
    pub fn render(&self, instances: &[Instance]) -> String {
        match self {
            Self::CpuUsage {
                deployment,
                usage_metric,
                requests_metric,
            } => {
                let container = instances
                    .first()
                    .map(|i| i.container.as_str())
                    .unwrap_or(".*");
                let selector = format!(
                    r#"pod=~"{deployment}-.*", container!="POD", container=~"{container}", phase="Running""#
                );
                format!(
                    "sum({usage_metric}{{{selector}}}) / (sum({requests_metric}{{{selector}}}) / count(count by (pod) ({usage_metric}{{{selector}}})))"
                )
            }
            Self::RequestsPerSecond { cluster_name } => format!(
                r#"sum(rate(envoy_cluster_upstream_rq{{envoy_cluster_name="{cluster_name}"}}[1m])) by (envoy_cluster_name)"#
            ),
            Self::Latency { cluster_name } => format!(
                r#"histogram_quantile(0.95, rate(envoy_cluster_upstream_rq_time_bucket{{envoy_cluster_name="{cluster_name}"}}[1m]))"#
            ),
        }
    }
}

/// A [`MetricSource`] backed by one Prometheus query.
pub struct PrometheusSource {
    client: PrometheusClient,
    step_secs: u64,
    query: PromQuery,
}

impl PrometheusSource {
    pub fn new(client: PrometheusClient, step_secs: u64, query: PromQuery) -> Self {
        Self {
            client,
            step_secs,
            query,
        }
    }

    pub fn cpu_usage(
        client: PrometheusClient,
        step_secs: u64,
        deployment: &str,
        usage_metric: Option<&str>,
        requests_metric: Option<&str>,
    ) -> Self {
        Self::new(
            client,
            step_secs,
            PromQuery::CpuUsage {
                deployment: deployment.to_string(),
                usage_metric: usage_metric.unwrap_or(DEFAULT_CPU_USAGE_METRIC).to_string(),
                requests_metric: requests_metric
                    .unwrap_or(DEFAULT_CPU_REQUESTS_METRIC)
                    .to_string(),
            },
        )
    }

    pub fn requests_per_second(client: PrometheusClient, step_secs: u64, cluster_name: &str) -> Self {
        Self::new(
            client,
            step_secs,
            PromQuery::RequestsPerSecond {
                cluster_name: cluster_name.to_string(),
            },
        )
    }

    pub fn latency(client: PrometheusClient, step_secs: u64, cluster_name: &str) -> Self {
        Self::new(
            client,
            step_secs,
            PromQuery::Latency {
                cluster_name: cluster_name.to_string(),
            },
        )
    }

    pub fn query(&self) -> &PromQuery {
        &self.query
    }
}

impl MetricSource for PrometheusSource {
    fn name(&self) -> &str {
        self.query.name()
    }

    fn get_data<'a>(
        &'a self,
        instances: &'a [Instance],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'a, CollaboratorResult<MetricSeries>> {
        Box::pin(async move {
            if instances.is_empty() {
                return Err(CollaboratorError::NoInstances);
            }
            let query = self.query.render(instances);
            self.client
                .query_range(&query, start, end, self.step_secs)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use prescale_core::testing::{StubResponse, StubServer};
    use std::time::Duration;

    fn instance(container: &str) -> Instance {
        Instance {
            name: "webapp-7d9f-abcde".to_string(),
            uid: "uid-1".to_string(),
            ip: Some("10.0.0.7".to_string()),
            container: container.to_string(),
        }
    }

    fn response(body: &str) -> QueryResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn parse_matrix_sorts_and_dedups() {
        let series = parse_matrix(response(
            r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{"envoy_cluster_name":"c"},"values":[[1700000120,"3"],[1700000060,"2"],[1700000120,"4"],[1700000180,"NaN"]]}
            ]}}"#,
        ))
        .unwrap();

        let values: Vec<f64> = series.samples().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![2.0, 4.0]);
        assert_eq!(
            series.earliest_timestamp(),
            Some(Utc.timestamp_opt(1_700_000_060, 0).unwrap())
        );
    }

    #[test]
    fn parse_matrix_empty_result_is_no_data() {
        let err = parse_matrix(response(
            r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, CollaboratorError::NoData(_)));
    }

    #[test]
    fn parse_matrix_error_status() {
        let err = parse_matrix(response(
            r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, CollaboratorError::BackendUnavailable(msg) if msg.contains("bad_data")));
    }

    #[test]
    fn cpu_query_uses_first_instance_container() {
        let query = PromQuery::CpuUsage {
            deployment: "webapp".to_string(),
            usage_metric: DEFAULT_CPU_USAGE_METRIC.to_string(),
            requests_metric: DEFAULT_CPU_REQUESTS_METRIC.to_string(),
        };
        let rendered = query.render(&[instance("app")]);
        assert!(rendered.contains(r#"pod=~"webapp-.*""#));
        assert!(rendered.contains(r#"container=~"app""#));
        assert!(rendered.starts_with("sum(eagle_pod_container_resource_usage_cpu_cores{"));
        assert!(rendered.contains("count(count by (pod)"));
    }

    #[test]
    fn rps_query_targets_cluster() {
        let query = PromQuery::RequestsPerSecond {
            cluster_name: "webapp_cluster".to_string(),
        };
        assert_eq!(
            query.render(&[]),
            r#"sum(rate(envoy_cluster_upstream_rq{envoy_cluster_name="webapp_cluster"}[1m])) by (envoy_cluster_name)"#
        );
    }

    #[tokio::test]
    async fn get_data_without_instances_fails() {
        let client = PrometheusClient::new("http://127.0.0.1:9", HttpClient::new(Duration::from_secs(1)));
        let source = PrometheusSource::requests_per_second(client, 60, "c");
        let now = Utc::now();

        let err = source.get_data(&[], now, now).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::NoInstances));
    }

    #[tokio::test]
    async fn get_data_queries_range_endpoint() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{},"values":[[1700000000,"0.25"],[1700000060,"0.5"]]}
            ]}}"#,
        )])
        .await;
        let client = PrometheusClient::new(&server.base_url(), HttpClient::new(Duration::from_secs(5)));
        let source = PrometheusSource::cpu_usage(client, 60, "webapp", None, None);

        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        let series = source.get_data(&[instance("app")], start, end).await.unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.last().unwrap().value, 0.5);

        let target = &server.requests()[0].target;
        assert!(target.starts_with("/api/v1/query_range?query="));
        assert!(target.contains("start=1700000000"));
        assert!(target.contains("end=1700000060"));
        assert!(target.contains("step=60"));
    }

    #[tokio::test]
    async fn backend_error_maps_to_unavailable() {
        let server = StubServer::start(vec![StubResponse::json(
            500,
            r#"{"status":"error","error":"boom"}"#,
        )])
        .await;
        let client = PrometheusClient::new(&server.base_url(), HttpClient::new(Duration::from_secs(5)));
        let source = PrometheusSource::latency(client, 60, "c");
        let now = Utc::now();

        let err = source.get_data(&[instance("app")], now, now).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::BackendUnavailable(_)));
    }
}
