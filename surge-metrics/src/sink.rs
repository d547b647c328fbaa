use std::fmt::Debug;
use std::time::Duration;

use crate::metrics::MetricKind;
use crate::registry::Registry;

/// The fixed set of series the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Metric {
    /// Gauge of currently running virtual users.
    #[strum(serialize = "runner_users_running")]
    UsersRunning,
    /// Histogram of successful step latencies.
    #[strum(serialize = "runner_transaction_success_duration_seconds")]
    StepSuccess,
    /// Counter of failed steps, labelled with `no_response`.
    #[strum(serialize = "runner_transaction_failed_count_total")]
    StepFailed,
    /// Histogram of successful iteration latencies.
    #[strum(serialize = "runner_scenario_success_duration_seconds")]
    IterationSuccess,
    /// Counter of failed iterations.
    #[strum(serialize = "runner_scenario_failed_count_total")]
    IterationFailed,
}

impl Metric {
    pub fn kind(self) -> MetricKind {
        match self {
            Self::UsersRunning => MetricKind::Gauge,
            Self::StepSuccess | Self::IterationSuccess => MetricKind::Histogram,
            Self::StepFailed | Self::IterationFailed => MetricKind::Counter,
        }
    }
}

/// Series key. Unset fields are simply not part of the series.
#[derive(Debug, Clone, Copy, Default)]
pub struct Labels<'a> {
    pub test: &'a str,
    pub scenario: &'a str,
    pub step: Option<&'a str>,
    pub no_response: Option<bool>,
}

impl<'a> Labels<'a> {
    pub fn scenario(test: &'a str, scenario: &'a str) -> Self {
        Self {
            test,
            scenario,
            ..Self::default()
        }
    }

    pub fn with_step(self, step: &'a str) -> Self {
        Self {
            step: Some(step),
            ..self
        }
    }

    pub fn with_no_response(self, no_response: bool) -> Self {
        Self {
            no_response: Some(no_response),
            ..self
        }
    }

    fn pairs(&self) -> ([(&'a str, &'a str); 4], usize) {
        let mut out = [("", ""); 4];
        out[0] = ("test_id", self.test);
        out[1] = ("scenario_name", self.scenario);
        let mut len = 2;
        if let Some(step) = self.step {
            out[len] = ("step_name", step);
            len += 1;
        }
        if let Some(no_response) = self.no_response {
            out[len] = ("no_response", if no_response { "true" } else { "false" });
            len += 1;
        }
        (out, len)
    }
}

/// Write-only metrics capability injected into schedulers and executors.
pub trait MetricsSink: Send + Sync + Debug {
    fn increment(&self, metric: Metric, labels: Labels<'_>, delta: i64);

    fn observe(&self, metric: Metric, labels: Labels<'_>, value: Duration);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn increment(&self, _metric: Metric, _labels: Labels<'_>, _delta: i64) {}

    fn observe(&self, _metric: Metric, _labels: Labels<'_>, _value: Duration) {}
}

impl Registry {
    fn series(&self, metric: Metric, labels: Labels<'_>) -> Option<crate::MetricHandle> {
        let id = self.register(&metric.to_string(), metric.kind());
        let (pairs, len) = labels.pairs();
        self.get_handle(id, self.resolve_tags(&pairs[..len]))
    }
}

impl MetricsSink for Registry {
    fn increment(&self, metric: Metric, labels: Labels<'_>, delta: i64) {
        if let Some(handle) = self.series(metric, labels) {
            handle.add(delta);
        }
    }

    fn observe(&self, metric: Metric, labels: Labels<'_>, value: Duration) {
        if let Some(handle) = self.series(metric, labels) {
            handle.record(value);
        }
    }
}
