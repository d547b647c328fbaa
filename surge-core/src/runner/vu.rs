use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use surge_metrics::{Labels, Metric, MetricsSink};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::pacing::next_sleep;
use crate::executor::{IterationContext, StepExecutor, UserSession};
use crate::script::Script;
use crate::template::VariableScope;

/// Everything a scenario's users share for one run.
#[derive(Debug)]
pub(crate) struct UserEnv {
    pub test: Arc<str>,
    pub scenario: Arc<str>,
    pub script: Arc<Script>,
    pub executor: StepExecutor,
    pub metrics: Arc<dyn MetricsSink>,
    pub pacing: Duration,
    pub pacing_delta: f64,
    pub seed: Option<u64>,
    pub active: Arc<AtomicU64>,
}

/// One simulated client: iterates the script until its stop token fires.
pub(crate) struct VirtualUser {
    env: Arc<UserEnv>,
    session: UserSession,
    stop: CancellationToken,
}

impl VirtualUser {
    pub fn new(id: u64, env: Arc<UserEnv>, stop: CancellationToken) -> Self {
        let rng = match env.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ id),
            None => StdRng::from_entropy(),
        };
        Self {
            session: UserSession::new(id, rng),
            env,
            stop,
        }
    }

    pub async fn run(mut self) {
        let env = self.env.clone();
        let labels = Labels::scenario(&env.test, &env.scenario);
        let user = self.session.id();

        env.metrics.increment(Metric::UsersRunning, labels, 1);
        env.active.fetch_add(1, Ordering::AcqRel);

        if let StepExecutor::Async(messaging) = &env.executor {
            match messaging.producers().open().await {
                Ok(producer) => self.session.producer = Some(producer),
                Err(err) => {
                    tracing::error!(
                        test = %env.test,
                        scenario = %env.scenario,
                        user,
                        error = %err,
                        "failed to open producer; user exits"
                    );
                    self.exit(labels).await;
                    return;
                }
            }
        }

        self.session.bindings.regenerate(
            &env.script.variables,
            VariableScope::Scenario,
            &mut self.session.rng,
        );
        tracing::debug!(test = %env.test, scenario = %env.scenario, user, "user started");

        let ctx = IterationContext {
            test: &env.test,
            scenario: &env.scenario,
            script: &env.script,
        };

        loop {
            let started = Instant::now();
            let ok = env
                .executor
                .run_iteration(ctx, &mut self.session, &env.metrics)
                .await;
            let elapsed = started.elapsed();

            if ok {
                env.metrics.observe(Metric::IterationSuccess, labels, elapsed);
            } else {
                env.metrics.increment(Metric::IterationFailed, labels, 1);
            }

            let sleep = next_sleep(env.pacing, env.pacing_delta, elapsed, &mut self.session.rng);
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        self.exit(labels).await;
    }

    async fn exit(&mut self, labels: Labels<'_>) {
        if let Some(producer) = self.session.producer.take() {
            producer.close().await;
        }
        self.env.metrics.increment(Metric::UsersRunning, labels, -1);
        self.env.active.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(
            test = %self.env.test,
            scenario = %self.env.scenario,
            user = self.session.id(),
            "user exited"
        );
    }
}
