use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use tokio::time::Instant;

use super::{IterationContext, StepOutcome, UserSession};
use crate::correlation::{AsyncSettings, CorrelationStore};
use crate::script::Step;
use crate::transport::ProducerFactory;

/// Async steps: publish through the user's producer, then wait for the correlated reply.
#[derive(Debug, Clone)]
pub struct AsyncSteps {
    settings: Arc<AsyncSettings>,
    store: Arc<CorrelationStore>,
    producers: Arc<dyn ProducerFactory>,
}

impl AsyncSteps {
    pub fn new(
        settings: Arc<AsyncSettings>,
        store: Arc<CorrelationStore>,
        producers: Arc<dyn ProducerFactory>,
    ) -> Self {
        Self {
            settings,
            store,
            producers,
        }
    }

    pub fn settings(&self) -> &AsyncSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<CorrelationStore> {
        &self.store
    }

    pub fn producers(&self) -> &Arc<dyn ProducerFactory> {
        &self.producers
    }

    pub(super) async fn execute(
        &self,
        ctx: IterationContext<'_>,
        step: &Step,
        is_last: bool,
        body: Cow<'_, str>,
        session: &mut UserSession,
    ) -> StepOutcome {
        let message_id = session
            .rng
            .gen_range(self.settings.id_range.clone())
            .to_string();
        let message = self.settings.substitute_id(&body, &message_id).into_owned();

        let Some(producer) = session.producer.as_deref() else {
            tracing::error!(
                test = ctx.test,
                scenario = ctx.scenario,
                step = %step.name,
                "virtual user has no producer"
            );
            return StepOutcome::Failed { no_response: true };
        };

        tracing::info!(
            test = ctx.test,
            scenario = ctx.scenario,
            script = %ctx.script.name,
            step = %step.name,
            message_id = %message_id,
            body = %message,
            "sending message"
        );

        let started = Instant::now();
        if let Err(err) = producer
            .send(&step.target, Bytes::from(message), &step.headers)
            .await
        {
            tracing::error!(
                test = ctx.test,
                scenario = ctx.scenario,
                script = %ctx.script.name,
                step = %step.name,
                message_id = %message_id,
                error = %err,
                "send failed"
            );
            return StepOutcome::Failed { no_response: true };
        }

        let Some(reply) = self
            .store
            .wait_for_message(&message_id, self.settings.wait_budget)
            .await
        else {
            tracing::warn!(
                test = ctx.test,
                scenario = ctx.scenario,
                script = %ctx.script.name,
                step = %step.name,
                message_id = %message_id,
                "no response within the wait budget"
            );
            return StepOutcome::Failed { no_response: true };
        };
        let latency = started.elapsed();

        let reply = String::from_utf8_lossy(&reply);
        let finished = self.settings.is_finished(&reply);
        if finished != is_last {
            tracing::warn!(
                test = ctx.test,
                scenario = ctx.scenario,
                script = %ctx.script.name,
                step = %step.name,
                message_id = %message_id,
                finished,
                body = %reply,
                "response does not match the step's position in the script"
            );
            return StepOutcome::Failed { no_response: false };
        }

        tracing::debug!(
            test = ctx.test,
            scenario = ctx.scenario,
            script = %ctx.script.name,
            step = %step.name,
            message_id = %message_id,
            body = %reply,
            "response received"
        );
        StepOutcome::Success(latency)
    }
}
