//! Serde definition documents and their compilation into runtime configuration.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::correlation::{
    AsyncSettings, DEFAULT_CORRELATION_PATTERN, DEFAULT_EVICTION_AGE, DEFAULT_FINISHED_MARKER,
    DEFAULT_ID_RANGE, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_BUDGET,
};
use crate::error::{Error, Result};
use crate::runner::{RampAction, RampStep};
use crate::script::{Script, Step};
use crate::template::{Variable, VariableScope};

/// Which executor drives a scenario's steps.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKind {
    #[default]
    Http,
    /// Fire-and-forget producer plus a correlated inbound stream.
    Async,
}

/// A whole load test: several scenarios sharing one duration budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub total_duration: DurationValue,

    pub scenarios: Vec<ScenarioDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDefinition {
    pub name: String,

    #[serde(default)]
    pub kind: ScenarioKind,

    #[serde(default)]
    pub steps: Vec<RampStepDefinition>,

    #[serde(default)]
    pub pacing: DurationValue,

    /// Jitter fraction applied to `pacing`, within `[0, 1]`.
    #[serde(default)]
    pub pacing_delta: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Wait for an external stop after the ramp instead of stopping automatically.
    #[serde(default)]
    pub hold_until_stopped: bool,

    pub script: ScriptDefinition,

    #[serde(rename = "async", default, skip_serializing_if = "Option::is_none")]
    pub async_settings: Option<AsyncDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RampStepDefinition {
    pub action: RampAction,

    #[serde(default)]
    pub total_users_count: u64,

    #[serde(default, alias = "countUsersByPeriod")]
    pub users_per_batch: u64,

    #[serde(default)]
    pub period: DurationValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDefinition {
    pub name: String,

    pub steps: Vec<StepDefinition>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, VariableDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub name: String,

    /// Message template.
    #[serde(default)]
    pub body: String,

    /// URL for HTTP steps, logical channel for async ones.
    #[serde(alias = "url")]
    pub target: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<DurationValue>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDefinition {
    pub scope: VariableScope,

    /// Pattern the value is synthesized from.
    #[serde(alias = "generationRegex")]
    pub generate: String,

    /// Pattern whose single capture group is the substitution span.
    #[serde(alias = "insertingRegex")]
    pub insert: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_marker: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_budget: Option<DurationValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_age: Option<DurationValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_period: Option<DurationValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<DurationValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_range: Option<IdRangeDefinition>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IdRangeDefinition {
    pub min: u64,
    pub max: u64,
}

/// A duration written as `"1m30s"`, integer seconds or float seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationValue(Duration);

impl DurationValue {
    pub fn into_inner(self) -> Duration {
        self.0
    }
}

impl From<Duration> for DurationValue {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl Serialize for DurationValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(self.0).to_string())
    }
}

impl<'de> Deserialize<'de> for DurationValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = DurationValue;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(DurationValue(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|secs| DurationValue(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(DurationValue)
                    .map_err(|_| E::custom("duration must be a finite, non-negative number"))
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(DurationValue(d))
            }

            fn visit_string<E>(self, v: String) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&v)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Runtime shape of a test, ready to hand to [`crate::TestRun`].
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub name: Arc<str>,
    pub id: Option<Arc<str>>,
    pub total_duration: Duration,
    pub scenarios: Vec<ScenarioConfig>,
}

/// Runtime shape of one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: Arc<str>,
    pub kind: ScenarioKind,
    pub ramp: Vec<RampStep>,
    pub pacing: Duration,
    pub pacing_delta: f64,
    pub seed: Option<u64>,
    /// When set, `run` waits for an external `stop()` once the ramp is exhausted.
    /// When clear, the scenario stops itself at that point so `run` returns on its own.
    pub hold_until_stopped: bool,
    pub script: Arc<Script>,
    /// Present for [`ScenarioKind::Async`].
    pub async_settings: Option<AsyncSettings>,
}

impl ScenarioConfig {
    pub fn new(name: &str, kind: ScenarioKind, script: Script) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            ramp: Vec::new(),
            pacing: Duration::ZERO,
            pacing_delta: 0.0,
            seed: None,
            hold_until_stopped: false,
            script: Arc::new(script),
            async_settings: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.pacing_delta.is_finite() || !(0.0..=1.0).contains(&self.pacing_delta) {
            return Err(Error::InvalidJitter(self.pacing_delta));
        }
        for (index, step) in self.ramp.iter().enumerate() {
            step.validate(index)?;
        }
        Ok(())
    }
}

impl TestDefinition {
    pub fn compile(self) -> Result<TestConfig> {
        let scenarios = self
            .scenarios
            .into_iter()
            .map(ScenarioDefinition::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(TestConfig {
            name: Arc::from(self.name),
            id: self.id.map(Arc::from),
            total_duration: self.total_duration.into_inner(),
            scenarios,
        })
    }
}

impl ScenarioDefinition {
    pub fn compile(self) -> Result<ScenarioConfig> {
        let script = self.script.compile()?;

        let async_settings = match self.kind {
            ScenarioKind::Http => None,
            ScenarioKind::Async => Some(self.async_settings.unwrap_or_default().compile()?),
        };

        let config = ScenarioConfig {
            name: Arc::from(self.name),
            kind: self.kind,
            ramp: self
                .steps
                .into_iter()
                .map(|s| RampStep {
                    action: s.action,
                    total_users_count: s.total_users_count,
                    users_per_batch: s.users_per_batch,
                    period: s.period.into_inner(),
                })
                .collect(),
            pacing: self.pacing.into_inner(),
            pacing_delta: self.pacing_delta,
            seed: self.seed,
            hold_until_stopped: self.hold_until_stopped,
            script: Arc::new(script),
            async_settings,
        };
        config.validate()?;
        Ok(config)
    }
}

impl ScriptDefinition {
    pub fn compile(self) -> Result<Script> {
        let variables = self
            .variables
            .iter()
            .map(|(name, def)| Variable::new(name, def.scope, &def.generate, &def.insert))
            .collect::<Result<Vec<_>>>()?;

        let steps = self
            .steps
            .into_iter()
            .map(StepDefinition::compile)
            .collect::<Result<Vec<_>>>()?;

        Script::new(&self.name, steps, variables)
    }
}

impl StepDefinition {
    pub fn compile(self) -> Result<Step> {
        let method =
            surge_http::HttpRequest::parse_method(&self.method).map_err(|source| {
                Error::InvalidMethod {
                    step: self.name.clone(),
                    source,
                }
            })?;

        Ok(Step {
            name: Arc::from(self.name),
            template: self.body,
            target: self.target,
            method,
            headers: self.headers.into_iter().collect(),
            timeout: self.timeout.map(DurationValue::into_inner),
        })
    }
}

impl AsyncDefinition {
    pub fn compile(self) -> Result<AsyncSettings> {
        let mut settings = AsyncSettings::new(
            self.correlation_pattern
                .as_deref()
                .unwrap_or(DEFAULT_CORRELATION_PATTERN),
        )?;

        settings.finished_marker = self
            .finished_marker
            .unwrap_or_else(|| DEFAULT_FINISHED_MARKER.to_string());
        settings.wait_budget = self
            .wait_budget
            .map_or(DEFAULT_WAIT_BUDGET, DurationValue::into_inner);
        settings.eviction_age = self
            .eviction_age
            .map_or(DEFAULT_EVICTION_AGE, DurationValue::into_inner);
        settings.sweep_period = self
            .sweep_period
            .map_or(settings.eviction_age, DurationValue::into_inner);
        settings.poll_interval = self
            .poll_interval
            .map_or(DEFAULT_POLL_INTERVAL, DurationValue::into_inner);
        settings.id_range = self
            .id_range
            .map_or(DEFAULT_ID_RANGE, |r| RangeInclusive::new(r.min, r.max.max(r.min)));

        Ok(settings)
    }
}
