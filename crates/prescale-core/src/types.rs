//! Domain types shared by the metric sources, the forecaster, and the
//! control loop.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Drop seconds and sub-second precision from a timestamp.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

// ── Metric series ─────────────────────────────────────────────────

/// One observation of the load metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A time-ordered series of samples with unique timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    samples: Vec<Sample>,
}

impl MetricSeries {
    /// Build a series from raw samples.
    ///
    /// Samples are sorted by timestamp; for duplicate timestamps the one
    /// appearing last in the input wins. NaN and infinite values are dropped.
    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        let mut samples: Vec<Sample> = samples
            .into_iter()
            .filter(|s| s.value.is_finite())
            .collect();
        // Stable sort keeps input order among equal timestamps.
        samples.sort_by_key(|s| s.timestamp);

        let mut deduped: Vec<Sample> = Vec::with_capacity(samples.len());
        for sample in samples {
            match deduped.last_mut() {
                Some(prev) if prev.timestamp == sample.timestamp => *prev = sample,
                _ => deduped.push(sample),
            }
        }

        Self { samples: deduped }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Timestamp of the oldest sample.
    pub fn earliest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.first().map(|s| s.timestamp)
    }

    /// Samples at or after `start`.
    pub fn since(&self, start: DateTime<Utc>) -> MetricSeries {
        let idx = self.samples.partition_point(|s| s.timestamp < start);
        Self {
            samples: self.samples[idx..].to_vec(),
        }
    }

    /// Resample onto a fixed grid starting at the first sample.
    ///
    /// Grid points that fall between two observations get a linearly
    /// interpolated value. A non-positive step returns the series unchanged.
    pub fn regularize(&self, step: TimeDelta) -> MetricSeries {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return self.clone();
        };
        if step <= TimeDelta::zero() {
            return self.clone();
        }

        let mut out = Vec::new();
        let mut idx = 0;
        let mut ts = first.timestamp;

        while ts <= last.timestamp {
            while idx + 1 < self.samples.len() && self.samples[idx + 1].timestamp <= ts {
                idx += 1;
            }
            let left = self.samples[idx];
            let value = match self.samples.get(idx + 1) {
                Some(right) if left.timestamp != ts => {
                    let span = (right.timestamp - left.timestamp).num_milliseconds() as f64;
                    let offset = (ts - left.timestamp).num_milliseconds() as f64;
                    left.value + (right.value - left.value) * offset / span
                }
                _ => left.value,
            };
            out.push(Sample::new(ts, value));
            ts += step;
        }

        Self { samples: out }
    }
}

// ── Instances ─────────────────────────────────────────────────────

/// A running instance of the workload (a pod, in Kubernetes terms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub uid: String,
    /// Instance IP, if the control plane reported one.
    pub ip: Option<String>,
    /// Container within the instance that carries the workload.
    pub container: String,
}

// ── Scaling decisions ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDirection {
    Up,
    Down,
}

impl ScalingDirection {
    /// Direction of a move from `from` to `to` instances.
    pub fn between(from: u32, to: u32) -> Self {
        if to > from { Self::Up } else { Self::Down }
    }
}

impl fmt::Display for ScalingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Which evaluator produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingKind {
    Proactive,
    Reactive,
}

impl fmt::Display for ScalingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proactive => f.write_str("Proactive"),
            Self::Reactive => f.write_str("Reactive"),
        }
    }
}

/// An applied scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub time: DateTime<Utc>,
    pub direction: ScalingDirection,
    pub kind: ScalingKind,
}

impl ScalingDecision {
    pub fn is_proactive_scale_up(&self) -> bool {
        self.kind == ScalingKind::Proactive && self.direction == ScalingDirection::Up
    }
}

impl fmt::Display for ScalingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time: [{}], direction: [{}], kind: [{}]",
            self.time, self.direction, self.kind
        )
    }
}

/// Default number of decisions kept by [`ScalingHistory`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// Most-recent-last record of applied decisions, bounded as a ring buffer.
#[derive(Debug, Clone)]
pub struct ScalingHistory {
    decisions: VecDeque<ScalingDecision>,
    capacity: usize,
}

impl ScalingHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// A history keeping at most `capacity` decisions (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            decisions: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, decision: ScalingDecision) {
        if self.decisions.len() == self.capacity {
            self.decisions.pop_front();
        }
        self.decisions.push_back(decision);
    }

    pub fn last(&self) -> Option<&ScalingDecision> {
        self.decisions.back()
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

impl Default for ScalingHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, min, sec).unwrap()
    }

    #[test]
    fn truncate_drops_seconds_and_nanos() {
        let ts = at(7, 42) + TimeDelta::microseconds(1234);
        assert_eq!(truncate_to_minute(ts), at(7, 0));
    }

    #[test]
    fn from_samples_sorts_and_dedups() {
        let series = MetricSeries::from_samples([
            Sample::new(at(2, 0), 2.0),
            Sample::new(at(0, 0), 0.0),
            Sample::new(at(1, 0), 1.0),
            Sample::new(at(1, 0), 1.5),
            Sample::new(at(3, 0), f64::NAN),
        ]);

        let values: Vec<f64> = series.samples().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![0.0, 1.5, 2.0]);
        assert_eq!(series.earliest_timestamp(), Some(at(0, 0)));
    }

    #[test]
    fn regularize_fills_gaps_by_interpolation() {
        let series = MetricSeries::from_samples([
            Sample::new(at(0, 0), 10.0),
            Sample::new(at(3, 0), 40.0),
            Sample::new(at(4, 0), 0.0),
        ]);

        let grid = series.regularize(TimeDelta::minutes(1));
        let values: Vec<f64> = grid.samples().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0, 40.0, 0.0]);
        assert_eq!(grid.last().unwrap().timestamp, at(4, 0));
    }

    #[test]
    fn regularize_empty_is_noop() {
        let empty = MetricSeries::default();
        assert!(empty.regularize(TimeDelta::minutes(1)).is_empty());
    }

    #[test]
    fn since_keeps_suffix() {
        let series = MetricSeries::from_samples((0..5).map(|m| Sample::new(at(m, 0), m as f64)));
        let tail = series.since(at(3, 0));
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.first().unwrap().value, 3.0);
    }

    #[test]
    fn history_is_bounded_and_keeps_latest() {
        let mut history = ScalingHistory::with_capacity(2);
        for (i, kind) in [ScalingKind::Reactive, ScalingKind::Reactive, ScalingKind::Proactive]
            .into_iter()
            .enumerate()
        {
            history.push(ScalingDecision {
                time: at(i as u32, 0),
                direction: ScalingDirection::Up,
                kind,
            });
        }

        assert_eq!(history.len(), 2);
        assert!(history.last().unwrap().is_proactive_scale_up());
    }

    #[test]
    fn direction_between_counts() {
        assert_eq!(ScalingDirection::between(2, 5), ScalingDirection::Up);
        assert_eq!(ScalingDirection::between(5, 2), ScalingDirection::Down);
    }
}
