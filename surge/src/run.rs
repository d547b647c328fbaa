use anyhow::Context as _;
use std::sync::Arc;

use surge_core::{Scenario, ScenarioKind, ScenarioResources, TestConfig, TestRun};
use surge_http::HttpClient;
use surge_metrics::{MetricsSink, Registry};
use tokio::time::Instant;

use crate::cli::RunArgs;
use crate::definition::{self, Overrides};
use crate::exit_codes::ExitCode;
use crate::run_error::RunError;
use crate::summary;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let def = definition::load(&args.file)
        .await
        .map_err(RunError::InvalidInput)?;
    let def = definition::finalize(
        def,
        Overrides {
            duration: args.duration,
            seed: args.seed,
        },
    );
    let config = def
        .compile()
        .context("invalid test definition")
        .map_err(RunError::InvalidInput)?;

    let registry = Arc::new(Registry::default());
    let test = build_test(config, &registry).map_err(RunError::InvalidInput)?;
    test.prepare()
        .context("failed to prepare scenarios")
        .map_err(RunError::InvalidInput)?;

    let test = Arc::new(test);
    let interrupt = tokio::spawn({
        let test = test.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!(test = test.name(), "interrupted; stopping scenarios");
                test.stop();
            }
        }
    });

    let started = Instant::now();
    let result = test.run().await;
    interrupt.abort();
    let elapsed = started.elapsed();

    result
        .context("test run failed")
        .map_err(RunError::RuntimeError)?;

    print!("{}", summary::render(&registry.summarize(), elapsed));
    Ok(ExitCode::Success)
}

/// One shared connection pool for every HTTP scenario of the run.
fn build_test(config: TestConfig, registry: &Arc<Registry>) -> anyhow::Result<TestRun> {
    let metrics: Arc<dyn MetricsSink> = registry.clone();
    let client = Arc::new(HttpClient::default());

    let scenarios = config
        .scenarios
        .into_iter()
        .map(|scenario| {
            if scenario.kind == ScenarioKind::Async {
                anyhow::bail!(
                    "scenario `{}`: async scenarios need a messaging transport, which the CLI does not provide",
                    scenario.name
                );
            }
            let name = scenario.name.clone();
            let resources = ScenarioResources::default()
                .with_metrics(metrics.clone())
                .with_http_client(client.clone());
            Scenario::new(scenario, resources)
                .with_context(|| format!("failed to build scenario `{name}`"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let id = config
        .id
        .unwrap_or_else(|| Arc::from(uuid::Uuid::new_v4().to_string()));
    Ok(TestRun::new(config.name, id, config.total_duration, scenarios))
}
