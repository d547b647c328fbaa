use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinSet;

use super::scenario::Scenario;
use crate::error::{Error, Result};

/// A named load test: several scenarios sharing one duration budget, run side by side.
#[derive(Debug)]
pub struct TestRun {
    name: Arc<str>,
    id: Arc<str>,
    total_duration: Duration,
    scenarios: Vec<Arc<Scenario>>,
}

impl TestRun {
    pub fn new(
        name: impl Into<Arc<str>>,
        id: impl Into<Arc<str>>,
        total_duration: Duration,
        scenarios: Vec<Scenario>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            total_duration,
            scenarios: scenarios.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn scenarios(&self) -> &[Arc<Scenario>] {
        &self.scenarios
    }

    pub fn prepare(&self) -> Result<()> {
        for scenario in &self.scenarios {
            scenario.prepare(self.total_duration)?;
        }
        Ok(())
    }

    /// Runs every scenario concurrently and returns the earliest start time.
    ///
    /// All scenarios are awaited even if one of them fails; the first error wins.
    pub async fn run(&self) -> Result<SystemTime> {
        tracing::info!(test = %self.name, run_id = %self.id, scenarios = self.scenarios.len(), "test started");

        let mut set = JoinSet::new();
        for scenario in &self.scenarios {
            let scenario = scenario.clone();
            let test = self.name.clone();
            let run_id = self.id.clone();
            set.spawn(async move { scenario.run(&test, &run_id).await });
        }

        let mut started: Option<SystemTime> = None;
        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            match joined.map_err(Error::from).and_then(|r| r) {
                Ok(at) => started = Some(started.map_or(at, |s| s.min(at))),
                Err(err) => {
                    // Don't leave siblings running on their own.
                    self.stop();
                    first_err.get_or_insert(err);
                }
            }
        }

        tracing::info!(test = %self.name, run_id = %self.id, "test finished");
        match first_err {
            Some(err) => Err(err),
            None => Ok(started.unwrap_or_else(SystemTime::now)),
        }
    }

    pub fn stop(&self) {
        for scenario in &self.scenarios {
            scenario.stop();
        }
    }
}
