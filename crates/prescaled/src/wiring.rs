//! Assembles the collaborators from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use prescale_autoscale::{Collaborators, LogNotifier, Notifier, WebhookNotifier};
use prescale_cluster::KubernetesController;
use prescale_core::{AutoscalerConfig, HttpClient};
use prescale_forecast::HoltForecaster;
use prescale_metrics::{
    build_metric_source, LogTelemetry, PushgatewayTelemetry, TelemetryCollector,
};

pub async fn build_collaborators(config: &AutoscalerConfig) -> anyhow::Result<Collaborators> {
    let http = HttpClient::new(config.collaborator_timeout());

    let cluster = KubernetesController::connect(config)
        .await
        .context("failed to configure the Kubernetes client")?;
    let metrics = build_metric_source(config, http.clone());

    let notifier: Arc<dyn Notifier> = match &config.notification.webhook_url {
        Some(url) => {
            info!(%url, "webhook notifications enabled");
            Arc::new(WebhookNotifier::new(url, http.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let telemetry: Arc<dyn TelemetryCollector> = match &config.telemetry.pushgateway_url {
        Some(url) => {
            let pushgateway =
                PushgatewayTelemetry::new(url, config.telemetry.location.as_deref(), http);
            info!(%url, location = %pushgateway.location(), "pushgateway telemetry enabled");
            Arc::new(pushgateway)
        }
        None => Arc::new(LogTelemetry),
    };

    Ok(Collaborators {
        cluster: Arc::new(cluster),
        metrics,
        forecaster: Arc::new(HoltForecaster::new()),
        notifier,
        telemetry,
    })
}
