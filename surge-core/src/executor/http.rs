use std::borrow::Cow;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use surge_http::{HttpClient, HttpRequest};
use tokio::time::Instant;

use super::{IterationContext, StepOutcome, UserSession};
use crate::script::Step;

const REQUEST_ID_BYTES: usize = 15;

/// HTTP steps share one pooled client per scenario.
#[derive(Debug, Clone)]
pub struct HttpSteps {
    client: Arc<HttpClient>,
}

impl HttpSteps {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    pub(super) async fn execute(
        &self,
        ctx: IterationContext<'_>,
        step: &Step,
        body: Cow<'_, str>,
        session: &mut UserSession,
    ) -> StepOutcome {
        let request_id = request_id(&mut session.rng);

        let mut req = HttpRequest::new(step.method.clone(), step.target.as_str())
            .with_body(body.into_owned())
            .with_timeout(step.timeout);
        for (name, value) in &step.headers {
            req = req.with_header(name.as_str(), value.as_str());
        }

        tracing::info!(
            test = ctx.test,
            scenario = ctx.scenario,
            script = %ctx.script.name,
            step = %step.name,
            request_id = %request_id,
            "sending request"
        );

        let started = Instant::now();
        let res = match self.client.request(req).await {
            Ok(res) => res,
            Err(err) => {
                tracing::error!(
                    test = ctx.test,
                    scenario = ctx.scenario,
                    script = %ctx.script.name,
                    step = %step.name,
                    request_id = %request_id,
                    kind = %err.transport_error_kind(),
                    error = %err,
                    "request failed"
                );
                return StepOutcome::Failed {
                    no_response: err.is_no_response(),
                };
            }
        };
        let latency = started.elapsed();

        let body = String::from_utf8_lossy(&res.body);
        if res.is_success() {
            tracing::debug!(
                test = ctx.test,
                scenario = ctx.scenario,
                script = %ctx.script.name,
                step = %step.name,
                request_id = %request_id,
                status = res.status,
                body = %body,
                "response received"
            );
            StepOutcome::Success(latency)
        } else {
            tracing::warn!(
                test = ctx.test,
                scenario = ctx.scenario,
                script = %ctx.script.name,
                step = %step.name,
                request_id = %request_id,
                status = res.status,
                body = %body,
                "unsuccessful response"
            );
            StepOutcome::Failed { no_response: false }
        }
    }
}

fn request_id<R: RngCore>(rng: &mut R) -> String {
    let mut bytes = [0u8; REQUEST_ID_BYTES];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn request_ids_are_url_safe_and_twenty_chars() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = request_id(&mut rng);
        let b = request_id(&mut rng);
        assert_eq!(a.len(), 20);
        assert_ne!(a, b);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "{a}"
        );
    }
}
