//! Control loop: one evaluate-and-act cycle per tick.
//!
//! Each tick lists the running instances, evaluates the proactive
//! (forecast-driven) and then the reactive (current-value-driven) scaler,
//! and applies the resulting instance count through the cluster controller.
//! Ticks are planned first and applied second: planning only touches the
//! forecast cache, so a plan can be recomputed without side effects.
//!
//! Failures inside a tick are logged and the loop carries on; the next
//! tick is the retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use prescale_cluster::ClusterController;
use prescale_core::config::AutoscalerConfig;
use prescale_core::{
    truncate_to_minute, CollaboratorError, CollaboratorResult, Instance, MetricSeries,
    ScalingDecision, ScalingDirection, ScalingHistory, ScalingKind,
};
use prescale_forecast::{ForecastResult, Forecaster, TrainedModel};
use prescale_metrics::{MetricSource, ScalingMode, TelemetryCollector};

use crate::engine::{cooldown_elapsed, pacing_delay, per_instance, ScalingPolicy};
use crate::explain;
use crate::notify::{Notifier, ScalingEvent};

/// Look-back used by the reactive evaluator when nothing was fetched yet.
const REACTIVE_WINDOW_MINS: i64 = 60;

/// Retraining happens this much before the refresh interval is up, so a
/// tick landing a little early still refreshes.
const REFRESH_SLACK_MINS: i64 = 2;

/// The services the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub cluster: Arc<dyn ClusterController>,
    pub metrics: Arc<dyn MetricSource>,
    pub forecaster: Arc<dyn Forecaster>,
    pub notifier: Arc<dyn Notifier>,
    pub telemetry: Arc<dyn TelemetryCollector>,
}

/// Mutable state carried across ticks.
pub struct ControllerState {
    history: ScalingHistory,
    model: Option<Box<dyn TrainedModel>>,
    forecast: Option<ForecastResult>,
    last_refresh: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    proactive_enabled: bool,
    proactive_downscaling_enabled: bool,
    /// Proactive mode is held off until the process has been up for the
    /// minimum training history.
    proactive_suppressed: bool,
}

impl ControllerState {
    fn new(config: &AutoscalerConfig, started_at: DateTime<Utc>) -> Self {
        let strategy = &config.strategy;
        let suppressed = strategy.delay_proactive_until_min_history && strategy.proactive_enabled;
        Self {
            history: ScalingHistory::new(),
            model: None,
            forecast: None,
            last_refresh: None,
            started_at,
            proactive_enabled: strategy.proactive_enabled && !suppressed,
            proactive_downscaling_enabled: strategy.proactive_downscaling_enabled && !suppressed,
            proactive_suppressed: suppressed,
        }
    }

    pub fn history(&self) -> &ScalingHistory {
        &self.history
    }

    pub fn last_decision_at(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|d| d.time)
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    pub fn forecast(&self) -> Option<&ForecastResult> {
        self.forecast.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn proactive_enabled(&self) -> bool {
        self.proactive_enabled
    }

    pub fn proactive_suppressed(&self) -> bool {
        self.proactive_suppressed
    }

    pub fn mode(&self) -> ScalingMode {
        if self.proactive_enabled {
            ScalingMode::Proactive
        } else {
            ScalingMode::Reactive
        }
    }
}

/// What the proactive evaluator concluded this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ProactiveOutcome {
    Disabled,
    /// The metric history does not reach back far enough to train on.
    InsufficientData {
        earliest: Option<DateTime<Utc>>,
    },
    /// Training, inference or the forecast lookup failed.
    ForecastUnavailable {
        reason: String,
    },
    NoBreach {
        predicted: f64,
    },
    /// The forecast breached the band but the bounded target equals the
    /// current count.
    AtBound {
        predicted: f64,
        direction: ScalingDirection,
    },
    /// A downscale was due but the cooldown has not passed.
    CooldownActive,
    Proposed {
        target: u32,
        applied: bool,
    },
}

/// The outcome of planning one tick, before anything is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct TickPlan {
    pub now: DateTime<Utc>,
    pub current: u32,
    pub target: u32,
    /// Evaluator responsible for `target`, when it differs from `current`.
    pub kind: Option<ScalingKind>,
    pub proactive: ProactiveOutcome,
    /// Notifications to send once the plan is applied.
    pub events: Vec<ScalingEvent>,
}

impl TickPlan {
    pub fn changes_instances(&self) -> bool {
        self.target != self.current
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NoInstances,
    Unchanged { instances: u32 },
    Scaled { from: u32, to: u32, kind: ScalingKind },
}

/// Metric data fetched within a tick and shared between the evaluators.
struct Observation {
    series: MetricSeries,
    current_value: f64,
}

pub struct Controller {
    config: AutoscalerConfig,
    policy: ScalingPolicy,
    collaborators: Collaborators,
    state: ControllerState,
}

impl Controller {
    /// Construction is synchronous and reports nothing; [`Controller::run`]
    /// announces the starting mode before its first tick. Callers driving
    /// ticks by hand call [`Controller::announce`] right after `new`.
    pub fn new(config: AutoscalerConfig, collaborators: Collaborators) -> Self {
        Self::with_start_time(config, collaborators, Utc::now())
    }

    /// Build a controller whose process start time is `started_at`.
    pub fn with_start_time(
        config: AutoscalerConfig,
        collaborators: Collaborators,
        started_at: DateTime<Utc>,
    ) -> Self {
        let policy = ScalingPolicy::from_config(&config);
        let state = ControllerState::new(&config, started_at);
        Self {
            config,
            policy,
            collaborators,
            state,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    fn deployment(&self) -> &str {
        &self.config.workload.deployment
    }

    /// Report the current mode to telemetry: proactive or reactive.
    pub async fn announce(&self) {
        self.report_mode(self.state.mode()).await;
    }

    /// Run ticks every `eval_interval` until `shutdown` fires, then report
    /// the stopped mode.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.eval_interval();
        info!(
            deployment = %self.deployment(),
            interval_secs = interval.as_secs(),
            mode = %self.state.mode(),
            "autoscaler started"
        );
        self.announce().await;
        match self
            .bounded("replica count", self.collaborators.cluster.replica_count())
            .await
        {
            Ok(replicas) => info!(deployment = %self.deployment(), replicas, "current replica count"),
            Err(e) => warn!(deployment = %self.deployment(), error = %e, "could not read replica count"),
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = tokio::time::Instant::now();
            let now = Utc::now();
            match self.tick(now).await {
                Ok(outcome) => debug!(deployment = %self.deployment(), ?outcome, "tick complete"),
                Err(e) => error!(
                    deployment = %self.deployment(),
                    error = %e,
                    at = %now,
                    "tick failed"
                ),
            }

            let delay = pacing_delay(interval, started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(deployment = %self.deployment(), "autoscaler shutting down");
        self.report_mode(ScalingMode::Stopped).await;
    }

    /// Plan and apply one tick at `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> CollaboratorResult<TickOutcome> {
        self.maybe_enable_proactive(now).await;
        match self.plan(now).await? {
            None => Ok(TickOutcome::NoInstances),
            Some(plan) => self.apply(plan).await,
        }
    }

    /// Evaluate the scalers at `now` without touching the cluster.
    ///
    /// Returns `None` when no instance is running.
    pub async fn plan(&mut self, now: DateTime<Utc>) -> CollaboratorResult<Option<TickPlan>> {
        let now_min = truncate_to_minute(now);

        let instances = self
            .bounded("list instances", self.collaborators.cluster.list_instances())
            .await?;
        if instances.is_empty() {
            info!(deployment = %self.deployment(), at = %now_min, "no running instances, skipping tick");
            return Ok(None);
        }
        let current = u32::try_from(instances.len()).unwrap_or(u32::MAX);

        let mut plan = TickPlan {
            now,
            current,
            target: current,
            kind: None,
            proactive: ProactiveOutcome::Disabled,
            events: Vec::new(),
        };
        let mut observation = None;

        if self.state.proactive_enabled {
            let proactive = self
                .evaluate_proactive(&instances, now, &mut plan, &mut observation)
                .await?;
            plan.proactive = proactive;
        }

        if self.config.strategy.reactive_enabled && !plan.changes_instances() {
            self.evaluate_reactive(&instances, now, &mut plan, &mut observation)
                .await?;
        }

        if !plan.changes_instances() && !self.policy.within_bounds(current) {
            let target = self.policy.clamp(current);
            let metric_explanation = explain::out_of_bounds(
                now_min,
                current,
                self.policy.min_instances,
                self.policy.max_instances,
            );
            warn!(deployment = %self.deployment(), current, target, "{metric_explanation}");
            self.propose(
                &mut plan,
                ScalingKind::Reactive,
                target,
                false,
                metric_explanation,
                observation.as_ref(),
            );
        }

        Ok(Some(plan))
    }

    async fn evaluate_proactive(
        &mut self,
        instances: &[Instance],
        now: DateTime<Utc>,
        plan: &mut TickPlan,
        observation: &mut Option<Observation>,
    ) -> CollaboratorResult<ProactiveOutcome> {
        let now_min = truncate_to_minute(now);
        let current = plan.current;
        let metrics = &self.config.metrics;

        let start = now_min - TimeDelta::hours(i64::from(metrics.max_train_history_hours));
        let series = self
            .bounded(
                "metric query",
                self.collaborators.metrics.get_data(instances, start, now_min),
            )
            .await?
            .regularize(self.config.step());
        let obs = observe(series, current)?;

        let gate = now_min - TimeDelta::hours(i64::from(metrics.min_train_history_hours));
        let earliest = obs.series.earliest_timestamp();
        if !earliest.is_some_and(|ts| ts < gate) {
            info!(
                deployment = %self.deployment(),
                earliest = ?earliest,
                required_before = %gate,
                "not enough metric history for proactive scaling"
            );
            *observation = Some(obs);
            return Ok(ProactiveOutcome::InsufficientData { earliest });
        }

        if let Err(e) = self.refresh_forecast(&obs.series, now_min).await {
            warn!(
                deployment = %self.deployment(),
                error = %e,
                "forecast unavailable, falling back to reactive scaling"
            );
            *observation = Some(obs);
            return Ok(ProactiveOutcome::ForecastUnavailable {
                reason: e.to_string(),
            });
        }

        let prediction_time =
            now_min + TimeDelta::minutes(i64::from(self.config.strategy.preempt_horizon_mins));
        let Some(raw) = self
            .state
            .forecast
            .as_ref()
            .and_then(|f| f.value_at(prediction_time))
        else {
            warn!(
                deployment = %self.deployment(),
                %prediction_time,
                "forecast has no value at the preempt horizon, falling back to reactive scaling"
            );
            *observation = Some(obs);
            return Ok(ProactiveOutcome::ForecastUnavailable {
                reason: format!("no prediction at {prediction_time}"),
            });
        };
        let predicted = per_instance(raw.max(0.0), current);

        let metric_explanation =
            explain::proactive_metric(prediction_time, now_min, current, obs.current_value, predicted);
        info!(deployment = %self.deployment(), predicted, current, "{metric_explanation}");

        let outcome = match self.policy.breach(predicted) {
            Some(ScalingDirection::Up) => {
                let target = self.policy.scale_up_amount(current, predicted);
                self.proposal_outcome(
                    plan,
                    ScalingDirection::Up,
                    target,
                    predicted,
                    metric_explanation,
                    &obs,
                )
            }
            Some(ScalingDirection::Down) if self.state.proactive_downscaling_enabled => {
                if cooldown_elapsed(
                    self.state.last_decision_at(),
                    now,
                    self.policy.downscale_cooldown_mins,
                ) {
                    let target = self.policy.scale_down_amount(current, predicted);
                    self.proposal_outcome(
                        plan,
                        ScalingDirection::Down,
                        target,
                        predicted,
                        metric_explanation,
                        &obs,
                    )
                } else {
                    info!(
                        deployment = %self.deployment(),
                        cooldown_mins = self.policy.downscale_cooldown_mins,
                        "no proactive downscaling during cooldown"
                    );
                    ProactiveOutcome::CooldownActive
                }
            }
            _ => ProactiveOutcome::NoBreach { predicted },
        };

        *observation = Some(obs);
        Ok(outcome)
    }

    fn proposal_outcome(
        &self,
        plan: &mut TickPlan,
        direction: ScalingDirection,
        target: u32,
        predicted: f64,
        metric_explanation: String,
        obs: &Observation,
    ) -> ProactiveOutcome {
        let forecast_only = self.config.strategy.proactive_forecast_only;
        if target == plan.current {
            info!(
                deployment = %self.deployment(),
                %direction,
                predicted,
                instances = target,
                "forecast breach already at the instance bound"
            );
            return ProactiveOutcome::AtBound {
                predicted,
                direction,
            };
        }
        self.propose(
            plan,
            ScalingKind::Proactive,
            target,
            forecast_only,
            metric_explanation,
            Some(obs),
        );
        ProactiveOutcome::Proposed {
            target,
            applied: !forecast_only,
        }
    }

    async fn evaluate_reactive(
        &mut self,
        instances: &[Instance],
        now: DateTime<Utc>,
        plan: &mut TickPlan,
        observation: &mut Option<Observation>,
    ) -> CollaboratorResult<()> {
        let now_min = truncate_to_minute(now);
        let current = plan.current;

        let obs = match observation.take() {
            Some(obs) => obs,
            None => {
                let start = now_min - TimeDelta::minutes(REACTIVE_WINDOW_MINS);
                let series = self
                    .bounded(
                        "metric query",
                        self.collaborators.metrics.get_data(instances, start, now_min),
                    )
                    .await?;
                observe(series, current)?
            }
        };
        let value = obs.current_value;

        let metric_explanation = explain::reactive_metric(now_min, current, value);
        info!(deployment = %self.deployment(), value, current, "{metric_explanation}");

        match self.policy.breach(value) {
            Some(ScalingDirection::Up) => {
                let target = self.policy.scale_up_amount(current, value);
                if target != current {
                    self.propose(plan, ScalingKind::Reactive, target, false, metric_explanation, Some(&obs));
                }
            }
            Some(ScalingDirection::Down) => {
                let cooldown = self.policy.reactive_downscale_cooldown(&self.state.history);
                if cooldown_elapsed(self.state.last_decision_at(), now, cooldown) {
                    let target = self.policy.scale_down_amount(current, value);
                    if target != current {
                        self.propose(plan, ScalingKind::Reactive, target, false, metric_explanation, Some(&obs));
                    }
                } else {
                    info!(
                        deployment = %self.deployment(),
                        cooldown_mins = cooldown,
                        "no reactive downscaling during cooldown"
                    );
                }
            }
            None => {}
        }

        *observation = Some(obs);
        Ok(())
    }

    /// Record a proposal in the plan. Forecast-only proposals are reported
    /// but leave the target untouched.
    fn propose(
        &self,
        plan: &mut TickPlan,
        kind: ScalingKind,
        target: u32,
        forecast_only: bool,
        metric_explanation: String,
        obs: Option<&Observation>,
    ) {
        let now_min = truncate_to_minute(plan.now);
        let scaling_explanation = explain::scaling(kind, plan.current, target, now_min, forecast_only);
        info!(
            deployment = %self.deployment(),
            from = plan.current,
            to = target,
            %kind,
            forecast_only,
            "{scaling_explanation}"
        );

        plan.events.push(ScalingEvent {
            time: now_min,
            deployment: self.deployment().to_string(),
            metric_explanation,
            scaling_explanation,
            kind,
            direction: ScalingDirection::between(plan.current, target),
            from: plan.current,
            to: target,
            forecast_only,
            proactive: self.state.proactive_enabled,
            observed: obs
                .map(|o| ScalingEvent::observed_tail(&o.series, now_min))
                .unwrap_or_default(),
            forecast: ScalingEvent::forecast_points(self.state.forecast.as_ref()),
        });

        if !forecast_only {
            plan.target = target;
            plan.kind = Some(kind);
        }
    }

    /// Retrain when due, then regenerate the forecast from `series`.
    async fn refresh_forecast(
        &mut self,
        series: &MetricSeries,
        now_min: DateTime<Utc>,
    ) -> CollaboratorResult<()> {
        let step = self.config.step();
        let refresh = TimeDelta::minutes(
            i64::from(self.config.forecasting.refresh_interval_mins) - REFRESH_SLACK_MINS,
        );
        let due = match (&self.state.model, self.state.last_refresh) {
            (Some(_), Some(last)) => now_min - refresh >= last,
            _ => true,
        };

        if due {
            let timeout = self.config.training_timeout();
            let model = with_timeout(
                "forecaster training",
                timeout,
                self.collaborators
                    .forecaster
                    .train(series, step, self.config.horizon_steps()),
            )
            .await?;
            info!(
                deployment = %self.deployment(),
                forecaster = %self.collaborators.forecaster.name(),
                points = series.len(),
                at = %now_min,
                "forecast model retrained"
            );
            self.state.model = Some(model);
            self.state.last_refresh = Some(now_min);
        }

        let Some(model) = self.state.model.as_ref() else {
            return Err(CollaboratorError::InferenceFailed(
                "no trained model".to_string(),
            ));
        };
        let forecast = with_timeout(
            "forecaster inference",
            self.config.training_timeout(),
            model.predict(series, step),
        )
        .await?;
        debug!(deployment = %self.deployment(), points = forecast.len(), "forecast regenerated");
        self.state.forecast = Some(forecast);
        Ok(())
    }

    /// Apply a plan: scale, record the decision, then notify.
    pub async fn apply(&mut self, plan: TickPlan) -> CollaboratorResult<TickOutcome> {
        let outcome = match plan.kind {
            Some(kind) if plan.changes_instances() => {
                self.bounded(
                    "set replica count",
                    self.collaborators.cluster.set_replica_count(plan.target),
                )
                .await?;
                let decision = ScalingDecision {
                    time: plan.now,
                    direction: ScalingDirection::between(plan.current, plan.target),
                    kind,
                };
                info!(
                    deployment = %self.deployment(),
                    from = plan.current,
                    to = plan.target,
                    %decision,
                    "scaling decision applied"
                );
                self.state.history.push(decision);
                TickOutcome::Scaled {
                    from: plan.current,
                    to: plan.target,
                    kind,
                }
            }
            _ => TickOutcome::Unchanged {
                instances: plan.current,
            },
        };

        for event in &plan.events {
            if let Err(e) = self
                .bounded("notification", self.collaborators.notifier.notify(event))
                .await
            {
                warn!(
                    deployment = %self.deployment(),
                    error = %e,
                    "failed to send scaling notification"
                );
            }
        }

        Ok(outcome)
    }

    /// Lift the proactive suppression once the process has been up for
    /// the minimum training history.
    async fn maybe_enable_proactive(&mut self, now: DateTime<Utc>) {
        if !self.state.proactive_suppressed {
            return;
        }
        let wait = TimeDelta::hours(i64::from(self.config.metrics.min_train_history_hours));
        if now - self.state.started_at < wait {
            return;
        }

        let strategy = &self.config.strategy;
        self.state.proactive_suppressed = false;
        self.state.proactive_enabled = strategy.proactive_enabled;
        self.state.proactive_downscaling_enabled = strategy.proactive_downscaling_enabled;
        info!(
            deployment = %self.deployment(),
            started_at = %self.state.started_at,
            "minimum history reached, proactive scaling enabled"
        );
        self.report_mode(self.state.mode()).await;
    }

    async fn report_mode(&self, mode: ScalingMode) {
        let deployment = self.deployment();
        if let Err(e) = self
            .bounded(
                "telemetry",
                self.collaborators.telemetry.report_mode(deployment, mode),
            )
            .await
        {
            warn!(%deployment, %mode, error = %e, "failed to report scaling mode");
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = CollaboratorResult<T>>,
    ) -> CollaboratorResult<T> {
        with_timeout(operation, self.config.collaborator_timeout(), fut).await
    }
}

async fn with_timeout<T>(
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = CollaboratorResult<T>>,
) -> CollaboratorResult<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout { operation, after }),
    }
}

fn observe(series: MetricSeries, instances: u32) -> CollaboratorResult<Observation> {
    let latest = series
        .last()
        .ok_or_else(|| CollaboratorError::NoData("metric series is empty".to_string()))?
        .value;
    Ok(Observation {
        current_value: per_instance(latest, instances),
        series,
    })
}
