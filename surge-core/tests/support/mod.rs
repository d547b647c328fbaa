#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use surge_core::correlation::DEFAULT_CORRELATION_PATTERN;
use surge_core::transport::memory::{Envelope, MemoryBroker};
use surge_core::{
    AsyncSettings, AsyncTransport, RampStep, Scenario, ScenarioConfig, ScenarioKind,
    ScenarioResources, Script, Step,
};
use surge_metrics::Registry;

/// Channel name the responder treats as the script's final step.
pub const FINAL_CHANNEL: &str = "orders.final";

pub const MESSAGE_TEMPLATE: &str = r#"{"messageId": 0, "op": "ping"}"#;

pub fn async_settings() -> AsyncSettings {
    AsyncSettings::new(DEFAULT_CORRELATION_PATTERN).unwrap_or_else(|e| panic!("{e:#}"))
}

/// Replies to every envelope with its id; only replies on [`FINAL_CHANNEL`] carry the
/// finished marker.
pub fn reply_by_channel(envelope: &Envelope) -> Vec<Bytes> {
    let settings = async_settings();
    let Some(id) = settings.extract_id(envelope.payload_utf8()) else {
        return Vec::new();
    };
    let finished = envelope.channel == FINAL_CHANNEL;
    vec![Bytes::from(format!(
        r#"{{"messageId": {id}, "finished": {finished}}}"#
    ))]
}

pub fn async_script(channels: &[&str]) -> Script {
    let steps = channels
        .iter()
        .enumerate()
        .map(|(i, channel)| Step::new(&format!("step-{i}"), *channel).with_template(MESSAGE_TEMPLATE))
        .collect();
    Script::new("orders", steps, Vec::new()).unwrap_or_else(|e| panic!("{e:#}"))
}

pub fn async_config(name: &str, ramp: Vec<RampStep>, pacing: Duration) -> ScenarioConfig {
    let mut cfg = ScenarioConfig::new(name, ScenarioKind::Async, async_script(&[FINAL_CHANNEL]));
    cfg.ramp = ramp;
    cfg.pacing = pacing;
    cfg.seed = Some(7);
    cfg.async_settings = Some(async_settings());
    cfg
}

/// An async scenario wired to a fresh broker whose responder answers every send.
pub fn async_scenario(
    config: ScenarioConfig,
    registry: &Arc<Registry>,
) -> (Scenario, MemoryBroker) {
    async_scenario_with(config, registry, reply_by_channel)
}

pub fn async_scenario_with<F>(
    config: ScenarioConfig,
    registry: &Arc<Registry>,
    reply: F,
) -> (Scenario, MemoryBroker)
where
    F: FnMut(&Envelope) -> Vec<Bytes> + Send + 'static,
{
    let broker = MemoryBroker::new();
    let consumer = broker
        .consumer()
        .unwrap_or_else(|| panic!("consumer already taken"));
    broker
        .spawn_responder(reply)
        .unwrap_or_else(|| panic!("outbound already taken"));

    let resources = ScenarioResources::default()
        .with_metrics(registry.clone())
        .with_transport(AsyncTransport::new(broker.producers(), Box::new(consumer)));
    let scenario = Scenario::new(config, resources).unwrap_or_else(|e| panic!("{e:#}"));
    (scenario, broker)
}
