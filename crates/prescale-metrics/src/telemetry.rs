//! Scaling-mode telemetry.
//!
//! The controller reports which evaluator is in charge: proactive once a
//! model can be trained, reactive otherwise, and stopped when the loop
//! exits. The Pushgateway collector groups the gauge under one job per
//! deployment so a restarted controller overwrites its own series.

use std::fmt;
use std::path::Path;

use bytes::Bytes;
use http::Method;
use tracing::{debug, info};

use prescale_core::{BoxFuture, CollaboratorResult, HttpClient};

use crate::exposition::render_scaling_mode;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingMode {
    Reactive,
    Proactive,
    Stopped,
}

impl ScalingMode {
    /// Gauge value published for this mode.
    pub fn value(self) -> i8 {
        match self {
            Self::Reactive => 0,
            Self::Proactive => 1,
            Self::Stopped => -1,
        }
    }
}

impl fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reactive => write!(f, "reactive"),
            Self::Proactive => write!(f, "proactive"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Receives scaling-mode updates.
pub trait TelemetryCollector: Send + Sync {
    fn report_mode<'a>(
        &'a self,
        deployment: &'a str,
        mode: ScalingMode,
    ) -> BoxFuture<'a, CollaboratorResult<()>>;
}

/// Detect where the controller runs: `k8s` inside a container, `local`
/// otherwise.
pub fn detect_location() -> &'static str {
    detect_location_from(Path::new("/.dockerenv"), Path::new("/proc/self/cgroup"))
}

fn detect_location_from(dockerenv: &Path, cgroup: &Path) -> &'static str {
    if dockerenv.exists() {
        return "k8s";
    }
    match std::fs::read_to_string(cgroup) {
        Ok(contents) if contents.contains("docker") || contents.contains("kubepods") => "k8s",
        _ => "local",
    }
}

/// Pushes the `scaling_mode` gauge to a Prometheus Pushgateway.
pub struct PushgatewayTelemetry {
    base_url: String,
    location: String,
    http: HttpClient,
}

impl PushgatewayTelemetry {
    pub fn new(base_url: &str, location: Option<&str>, http: HttpClient) -> Self {
        let location = location
            .map(str::to_string)
            .unwrap_or_else(|| detect_location().to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            location,
            http,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn job_url(&self, deployment: &str) -> String {
        format!(
            "{}/metrics/job/prescale-{}-{}",
            self.base_url, self.location, deployment
        )
    }
}

impl TelemetryCollector for PushgatewayTelemetry {
    fn report_mode<'a>(
        &'a self,
        deployment: &'a str,
        mode: ScalingMode,
    ) -> BoxFuture<'a, CollaboratorResult<()>> {
        Box::pin(async move {
            let body = render_scaling_mode(&self.location, deployment, mode.value());
            let url = self.job_url(deployment);
            self.http
                .send(
                    Method::PUT,
                    &url,
                    Some(EXPOSITION_CONTENT_TYPE),
                    Bytes::from(body),
                )
                .await?;
            debug!(%deployment, %mode, %url, "scaling mode pushed");
            Ok(())
        })
    }
}

/// Records scaling-mode changes in the log only.
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl TelemetryCollector for LogTelemetry {
    fn report_mode<'a>(
        &'a self,
        deployment: &'a str,
        mode: ScalingMode,
    ) -> BoxFuture<'a, CollaboratorResult<()>> {
        Box::pin(async move {
            info!(%deployment, %mode, value = mode.value(), "scaling mode");
            Ok(())
        })
    }
}
