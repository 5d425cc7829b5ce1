//! Scaling notifications.
//!
//! Every scaling proposal, applied or forecast-only, is turned into a
//! [`ScalingEvent`] and handed to a [`Notifier`]. Notification failures are
//! logged by the caller and never undo a scaling command.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use http::Method;
use serde::Serialize;
use tracing::{info, warn};

use prescale_core::{
    BoxFuture, CollaboratorError, CollaboratorResult, HttpClient, MetricSeries, Sample,
    ScalingDirection, ScalingKind,
};
use prescale_forecast::{ForecastPoint, ForecastResult};

/// How much observed history travels with an event.
pub const OBSERVED_TAIL_HOURS: i64 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingEvent {
    pub time: DateTime<Utc>,
    pub deployment: String,
    pub metric_explanation: String,
    pub scaling_explanation: String,
    pub kind: ScalingKind,
    pub direction: ScalingDirection,
    pub from: u32,
    pub to: u32,
    pub forecast_only: bool,
    /// Whether proactive scaling was active when the event was raised.
    pub proactive: bool,
    pub observed: Vec<Sample>,
    pub forecast: Vec<ForecastPoint>,
}

impl ScalingEvent {
    /// Last [`OBSERVED_TAIL_HOURS`] of `series` as of `now`.
    pub fn observed_tail(series: &MetricSeries, now: DateTime<Utc>) -> Vec<Sample> {
        series
            .since(now - TimeDelta::hours(OBSERVED_TAIL_HOURS))
            .samples()
            .to_vec()
    }

    pub fn forecast_points(forecast: Option<&ForecastResult>) -> Vec<ForecastPoint> {
        forecast.map(ForecastResult::points).unwrap_or_default()
    }

    pub fn subject(&self) -> String {
        let mode = if self.proactive { "Proactive" } else { "Reactive" };
        format!("{mode} autoscaler for {} notification", self.deployment)
    }

    pub fn summary(&self) -> String {
        format!("{}.\n{}.", self.metric_explanation, self.scaling_explanation)
    }
}

pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, event: &'a ScalingEvent) -> BoxFuture<'a, CollaboratorResult<()>>;
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, event: &'a ScalingEvent) -> BoxFuture<'a, CollaboratorResult<()>> {
        Box::pin(async move {
            info!(
                deployment = %event.deployment,
                kind = %event.kind,
                direction = %event.direction,
                from = event.from,
                to = event.to,
                forecast_only = event.forecast_only,
                "{}",
                event.summary()
            );
            Ok(())
        })
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: String,
    text: String,
    #[serde(flatten)]
    event: &'a ScalingEvent,
}

/// POSTs events as JSON to a webhook, retrying failed deliveries.
pub struct WebhookNotifier {
    url: String,
    http: HttpClient,
    attempts: u32,
    retry_delay: Duration,
}

impl WebhookNotifier {
    pub fn new(url: &str, http: HttpClient) -> Self {
        Self {
            url: url.to_string(),
            http,
            attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }

    /// Total delivery attempts (minimum 1) and the pause between them.
    pub fn with_retries(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(&'a self, event: &'a ScalingEvent) -> BoxFuture<'a, CollaboratorResult<()>> {
        Box::pin(async move {
            let payload = WebhookPayload {
                subject: event.subject(),
                text: event.summary(),
                event,
            };
            let body = serde_json::to_vec(&payload).map_err(|e| {
                CollaboratorError::BackendUnavailable(format!("failed to encode event: {e}"))
            })?;
            let body = Bytes::from(body);

            let mut attempt = 1;
            loop {
                match self
                    .http
                    .send(Method::POST, &self.url, Some("application/json"), body.clone())
                    .await
                {
                    Ok(_) => return Ok(()),
                    Err(e) if attempt < self.attempts => {
                        warn!(
                            url = %self.url,
                            attempt,
                            attempts = self.attempts,
                            error = %e,
                            "webhook delivery failed, retrying"
                        );
                        attempt += 1;
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        })
    }
}
