use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(
    Debug,
    Clone,
    Copy,
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
pub enum RampAction {
    /// Launch users in batches.
    Start,
    /// Hold the current population.
    Duration,
    /// Retire running users in batches.
    Stop,
}

/// One stage of a scenario's population profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampStep {
    pub action: RampAction,
    pub total_users_count: u64,
    pub users_per_batch: u64,
    /// Pause after each batch for Start/Stop; the hold time for Duration.
    pub period: Duration,
}

impl RampStep {
    pub fn start(total_users_count: u64, users_per_batch: u64, period: Duration) -> Self {
        Self {
            action: RampAction::Start,
            total_users_count,
            users_per_batch,
            period,
        }
    }

    pub fn hold(period: Duration) -> Self {
        Self {
            action: RampAction::Duration,
            total_users_count: 0,
            users_per_batch: 0,
            period,
        }
    }

    pub fn stop(total_users_count: u64, users_per_batch: u64, period: Duration) -> Self {
        Self {
            action: RampAction::Stop,
            total_users_count,
            users_per_batch,
            period,
        }
    }

    pub(crate) fn validate(&self, index: usize) -> Result<()> {
        if self.action != RampAction::Duration && self.users_per_batch == 0 {
            return Err(Error::InvalidBatch {
                index,
                action: self.action.to_string(),
            });
        }
        Ok(())
    }

    /// Number of batches, the last one possibly partial.
    pub fn batch_count(&self) -> u64 {
        match self.action {
            RampAction::Duration => 0,
            _ if self.users_per_batch == 0 => 0,
            _ => self.total_users_count.div_ceil(self.users_per_batch),
        }
    }

    /// Sizes of successive batches; they sum to `total_users_count`.
    pub fn batch_sizes(&self) -> impl Iterator<Item = u64> + '_ {
        let batch = self.users_per_batch;
        let total = self.total_users_count;
        (0..self.batch_count()).map(move |i| batch.min(total - i * batch))
    }

    /// Wall time the step occupies once expanded into batches.
    pub fn scheduled_duration(&self) -> Duration {
        match self.action {
            RampAction::Duration => self.period,
            _ => mul_period(self.period, self.batch_count()),
        }
    }
}

fn mul_period(period: Duration, n: u64) -> Duration {
    let nanos = period.as_nanos().saturating_mul(u128::from(n));
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Fits `steps` into `total`.
///
/// A hold that overruns is clipped to what is left and ends the profile. A Start/Stop
/// step that overruns keeps only the whole batches that fit; if none fit it is dropped,
/// and later steps are still considered against the remaining budget.
pub fn fit_to_budget(steps: &[RampStep], total: Duration) -> Vec<RampStep> {
    let mut remaining = total;
    let mut out = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        match step.action {
            RampAction::Duration => {
                if step.period > remaining {
                    tracing::debug!(
                        index,
                        period = ?step.period,
                        clipped = ?remaining,
                        "hold clipped to the test duration; later ramp steps dropped"
                    );
                    out.push(RampStep {
                        period: remaining,
                        ..step.clone()
                    });
                    break;
                }
                remaining -= step.period;
                out.push(step.clone());
            }
            RampAction::Start | RampAction::Stop => {
                let needed = step.scheduled_duration();
                if needed <= remaining {
                    remaining -= needed;
                    out.push(step.clone());
                    continue;
                }

                // `needed > remaining` implies a non-zero period.
                let fits = u64::try_from(remaining.as_nanos() / step.period.as_nanos())
                    .unwrap_or(u64::MAX)
                    .min(step.batch_count());
                if fits == 0 {
                    tracing::debug!(index, action = %step.action, "no whole batch fits; ramp step dropped");
                    continue;
                }

                let total_users_count =
                    (fits * step.users_per_batch).min(step.total_users_count);
                tracing::debug!(
                    index,
                    action = %step.action,
                    from = step.total_users_count,
                    to = total_users_count,
                    "ramp step shrunk to the batches that fit"
                );
                remaining = remaining.saturating_sub(mul_period(step.period, fits));
                out.push(RampStep {
                    total_users_count,
                    ..step.clone()
                });
            }
        }
    }

    out
}
