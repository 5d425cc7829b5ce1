//! Autoscaler configuration parser.
//!
//! The configuration is a TOML file loaded once at startup and never
//! mutated afterwards. [`AutoscalerConfig::from_file`] parses and validates
//! in one step; an invalid file is a fatal startup error.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Shortest evaluation interval the controller accepts.
pub const MIN_EVAL_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    pub prometheus: PrometheusConfig,
    pub metrics: MetricsConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub forecasting: ForecastingConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// The workload whose replica count is managed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub deployment: String,
    pub container: String,
}

/// How to reach the Kubernetes API server.
///
/// With nothing set the client is inferred from the in-cluster service
/// account, falling back to the local kubeconfig.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// API server override, e.g. `https://kubernetes.default.svc` or a
    /// `kubectl proxy` endpoint.
    pub api_url: Option<String>,
    /// Bearer token file. Re-read periodically so rotated tokens are picked up.
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    pub url: String,
}

/// Which load metric drives scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    CpuUsage,
    RequestsPerSecond,
    Latency,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuUsage => "cpu_usage",
            Self::RequestsPerSecond => "requests_per_second",
            Self::Latency => "latency",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub source: MetricKind,
    /// Per-instance target value of the metric.
    pub target_value: f64,
    /// Half-width of the hysteresis band around `target_value`.
    pub breach_tolerance: f64,
    pub min_train_history_hours: u32,
    pub max_train_history_hours: u32,
    #[serde(default = "default_step_size_mins")]
    pub step_size_mins: u32,
    /// Source-specific parameters (e.g. `cluster_name`).
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_true")]
    pub reactive_enabled: bool,
    #[serde(default)]
    pub proactive_enabled: bool,
    #[serde(default)]
    pub proactive_downscaling_enabled: bool,
    /// Compute and report proactive decisions without applying them.
    #[serde(default)]
    pub proactive_forecast_only: bool,
    /// Hold proactive mode off until the process has been up for
    /// `min_train_history_hours`.
    #[serde(default)]
    pub delay_proactive_until_min_history: bool,
    #[serde(default = "default_eval_interval_secs")]
    pub eval_interval_secs: u64,
    pub min_instances: u32,
    pub max_instances: u32,
    pub downscale_cooldown_mins: u32,
    pub downscale_after_proactive_scaleup_cooldown_mins: u32,
    pub preempt_horizon_mins: u32,
    /// Floor for a single downscale, as a percentage of current instances.
    pub downscale_max_percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastingConfig {
    pub refresh_interval_mins: u32,
    /// How far past the last observation the forecast extends.
    pub horizon_mins: u32,
}

impl Default for ForecastingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_mins: 60,
            horizon_mins: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub pushgateway_url: Option<String>,
    /// Overrides the auto-detected `scaler_location` label.
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Bound on metric, cluster, notifier and telemetry calls.
    pub collaborator_secs: u64,
    /// Bound on forecaster training and inference.
    pub training_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            collaborator_secs: 30,
            training_secs: 300,
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_step_size_mins() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_eval_interval_secs() -> u64 {
    60
}

impl AutoscalerConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AutoscalerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let strategy = &self.strategy;
        let metrics = &self.metrics;

        if strategy.eval_interval_secs < MIN_EVAL_INTERVAL_SECS {
            return Err(ConfigError::invalid(
                "strategy.eval_interval_secs",
                format!(
                    "must be at least {MIN_EVAL_INTERVAL_SECS}, got {}",
                    strategy.eval_interval_secs
                ),
            ));
        }
        if strategy.max_instances == 0 {
            return Err(ConfigError::invalid("strategy.max_instances", "must be at least 1"));
        }
        // At zero replicas there is nothing left to measure, so no tick
        // could ever scale back up.
        if strategy.min_instances == 0 {
            return Err(ConfigError::invalid("strategy.min_instances", "must be at least 1"));
        }
        if strategy.min_instances > strategy.max_instances {
            return Err(ConfigError::invalid(
                "strategy.min_instances",
                format!(
                    "{} exceeds max_instances {}",
                    strategy.min_instances, strategy.max_instances
                ),
            ));
        }
        if let Some(pct) = strategy.downscale_max_percentage
            && !(0.0..=100.0).contains(&pct)
        {
            return Err(ConfigError::invalid(
                "strategy.downscale_max_percentage",
                format!("must be within 0-100, got {pct}"),
            ));
        }
        if !(metrics.target_value.is_finite() && metrics.target_value > 0.0) {
            return Err(ConfigError::invalid("metrics.target_value", "must be positive"));
        }
        if !(metrics.breach_tolerance.is_finite() && metrics.breach_tolerance >= 0.0) {
            return Err(ConfigError::invalid(
                "metrics.breach_tolerance",
                "must be zero or positive",
            ));
        }
        if metrics.min_train_history_hours > metrics.max_train_history_hours {
            return Err(ConfigError::invalid(
                "metrics.min_train_history_hours",
                "exceeds max_train_history_hours",
            ));
        }
        if metrics.step_size_mins == 0 {
            return Err(ConfigError::invalid("metrics.step_size_mins", "must be at least 1"));
        }
        if matches!(
            metrics.source,
            MetricKind::RequestsPerSecond | MetricKind::Latency
        ) && !metrics.params.contains_key("cluster_name")
        {
            return Err(ConfigError::invalid(
                "metrics.params.cluster_name",
                format!("required for the {} source", metrics.source),
            ));
        }
        if strategy.proactive_enabled {
            if self.forecasting.horizon_mins < strategy.preempt_horizon_mins {
                return Err(ConfigError::invalid(
                    "forecasting.horizon_mins",
                    "must cover strategy.preempt_horizon_mins",
                ));
            }
            if self.forecasting.refresh_interval_mins == 0 {
                return Err(ConfigError::invalid(
                    "forecasting.refresh_interval_mins",
                    "must be at least 1",
                ));
            }
        }
        if self.timeouts.collaborator_secs == 0 {
            return Err(ConfigError::invalid("timeouts.collaborator_secs", "must be positive"));
        }
        if self.timeouts.training_secs == 0 {
            return Err(ConfigError::invalid("timeouts.training_secs", "must be positive"));
        }

        check_http_url("prometheus.url", Some(&self.prometheus.url))?;
        if let Some(url) = &self.kubernetes.api_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::invalid(
                "kubernetes.api_url",
                format!("must be an http:// or https:// URL, got {url}"),
            ));
        }
        check_http_url(
            "notification.webhook_url",
            self.notification.webhook_url.as_deref(),
        )?;
        check_http_url(
            "telemetry.pushgateway_url",
            self.telemetry.pushgateway_url.as_deref(),
        )?;

        Ok(())
    }

    pub fn eval_interval(&self) -> Duration {
        Duration::from_secs(self.strategy.eval_interval_secs)
    }

    /// Sampling step of the metric series.
    pub fn step(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.metrics.step_size_mins))
    }

    /// Number of forecast points needed to cover `forecasting.horizon_mins`.
    pub fn horizon_steps(&self) -> usize {
        self.forecasting
            .horizon_mins
            .div_ceil(self.metrics.step_size_mins.max(1))
            .max(1) as usize
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.collaborator_secs)
    }

    pub fn training_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.training_secs)
    }
}

fn check_http_url(field: &'static str, url: Option<&str>) -> Result<(), ConfigError> {
    match url {
        Some(url) if !url.starts_with("http://") => Err(ConfigError::invalid(
            field,
            format!("only plain http:// endpoints are supported, got {url}"),
        )),
        _ => Ok(()),
    }
}
