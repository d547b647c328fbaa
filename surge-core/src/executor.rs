//! Runs one iteration of a script, step by step, and classifies each step's outcome.

mod http;
mod messaging;

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use surge_metrics::{Labels, Metric, MetricsSink};

use crate::script::Script;
use crate::template::{Bindings, VariableScope};
use crate::transport::MessageProducer;

pub use http::HttpSteps;
pub use messaging::AsyncSteps;

/// What happened to a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success(Duration),
    /// `no_response` is true when nothing usable came back (transport error, timeout,
    /// missing correlated message); false when a response arrived but was wrong.
    Failed { no_response: bool },
}

/// Per-user mutable state threaded through every iteration.
pub struct UserSession {
    pub(crate) id: u64,
    pub(crate) rng: StdRng,
    pub(crate) bindings: Bindings,
    pub(crate) producer: Option<Box<dyn MessageProducer>>,
}

impl UserSession {
    pub fn new(id: u64, rng: StdRng) -> Self {
        Self {
            id,
            rng,
            bindings: Bindings::default(),
            producer: None,
        }
    }

    #[must_use]
    pub fn with_producer(mut self, producer: Box<dyn MessageProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }
}

impl std::fmt::Debug for UserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSession")
            .field("id", &self.id)
            .field("bindings", &self.bindings)
            .field("producer", &self.producer.is_some())
            .finish()
    }
}

/// Names that end up on every log record and metric series of an iteration.
#[derive(Debug, Clone, Copy)]
pub struct IterationContext<'a> {
    pub test: &'a str,
    pub scenario: &'a str,
    pub script: &'a Script,
}

impl<'a> IterationContext<'a> {
    fn labels(&self) -> Labels<'a> {
        Labels::scenario(self.test, self.scenario)
    }
}

/// Dispatch for a scenario's steps, fixed when the scenario is built.
#[derive(Debug, Clone)]
pub enum StepExecutor {
    Http(HttpSteps),
    Async(AsyncSteps),
}

impl StepExecutor {
    /// Runs every step in order, stopping at the first failure. Returns whether the
    /// whole iteration succeeded.
    pub async fn run_iteration(
        &self,
        ctx: IterationContext<'_>,
        session: &mut UserSession,
        metrics: &Arc<dyn MetricsSink>,
    ) -> bool {
        let script = ctx.script;
        session
            .bindings
            .regenerate(&script.variables, VariableScope::Iteration, &mut session.rng);

        let last = script.last_step_index();
        for (index, step) in script.steps.iter().enumerate() {
            session
                .bindings
                .regenerate(&script.variables, VariableScope::Step, &mut session.rng);
            let body = session.bindings.render(&script.variables, &step.template);

            let outcome = match self {
                Self::Http(http) => http.execute(ctx, step, body, session).await,
                Self::Async(messaging) => {
                    messaging
                        .execute(ctx, step, index == last, body, session)
                        .await
                }
            };

            let labels = ctx.labels().with_step(&step.name);
            match outcome {
                StepOutcome::Success(latency) => {
                    metrics.observe(Metric::StepSuccess, labels, latency);
                }
                StepOutcome::Failed { no_response } => {
                    metrics.increment(
                        Metric::StepFailed,
                        labels.with_no_response(no_response),
                        1,
                    );
                    return false;
                }
            }
        }
        true
    }
}
