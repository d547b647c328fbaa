mod support;

use std::sync::Arc;
use std::time::Duration;

use surge_core::{Error, RampStep, ScenarioState};
use surge_metrics::{Metric, Registry};
use tokio::time::Instant;

const SEC: Duration = Duration::from_secs(1);

#[tokio::test(start_paused = true)]
async fn ramp_launches_and_retires_every_user() {
    let registry = Arc::new(Registry::default());
    let config = support::async_config(
        "ramp",
        vec![
            RampStep::start(100, 10, SEC),
            RampStep::hold(Duration::from_secs(5)),
            RampStep::stop(100, 10, SEC),
        ],
        SEC,
    );
    let (scenario, broker) = support::async_scenario(config, &registry);
    let scenario = Arc::new(scenario);

    scenario
        .prepare(Duration::from_secs(60))
        .unwrap_or_else(|e| panic!("{e:#}"));
    assert_eq!(scenario.state(), ScenarioState::Prepared);

    let started = Instant::now();
    let runner = {
        let scenario = scenario.clone();
        tokio::spawn(async move { scenario.run("ramp-test", "run-1").await })
    };

    // Retirement starts at 15s and takes one batch of ten per second.
    tokio::time::sleep(Duration::from_millis(15_500)).await;
    assert_eq!(scenario.active_users(), 90);
    assert_eq!(scenario.state(), ScenarioState::Running);
    tokio::time::sleep(SEC).await;
    assert_eq!(scenario.active_users(), 80);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(scenario.active_users(), 50);

    runner
        .await
        .unwrap_or_else(|e| panic!("{e:#}"))
        .unwrap_or_else(|e| panic!("{e:#}"));
    let elapsed = started.elapsed();

    assert_eq!(scenario.state(), ScenarioState::Terminated);
    assert_eq!(scenario.active_users(), 0);
    assert_eq!(broker.opened_producers(), 100);
    assert_eq!(broker.closed_producers(), 100);
    assert_eq!(
        registry.gauge_total(&Metric::UsersRunning.to_string(), &[]),
        0
    );
    assert!(
        registry.histogram_count(&Metric::IterationSuccess.to_string(), &[]) >= 100,
        "every user should complete at least one iteration"
    );
    assert_eq!(
        registry.counter_total(&Metric::IterationFailed.to_string(), &[]),
        0
    );

    // 10 launch batches + 5s hold + 10 retire batches.
    assert!(elapsed >= Duration::from_secs(25), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(27), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn population_is_observable_mid_ramp() {
    let registry = Arc::new(Registry::default());
    let config = support::async_config(
        "observe",
        vec![RampStep::start(30, 10, SEC), RampStep::hold(Duration::from_secs(10))],
        SEC,
    );
    let (scenario, _broker) = support::async_scenario(config, &registry);
    let scenario = Arc::new(scenario);
    scenario
        .prepare(Duration::from_secs(60))
        .unwrap_or_else(|e| panic!("{e:#}"));

    let runner = {
        let scenario = scenario.clone();
        tokio::spawn(async move { scenario.run("observe-test", "run-1").await })
    };

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(scenario.active_users(), 20);
    assert_eq!(scenario.state(), ScenarioState::Running);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(scenario.active_users(), 30);

    scenario.stop();
    runner
        .await
        .unwrap_or_else(|e| panic!("{e:#}"))
        .unwrap_or_else(|e| panic!("{e:#}"));
    assert_eq!(scenario.active_users(), 0);
}

#[tokio::test(start_paused = true)]
async fn prepare_truncates_to_the_total_duration() {
    let registry = Arc::new(Registry::default());
    let config = support::async_config(
        "truncate",
        vec![
            RampStep::start(100, 10, SEC),
            RampStep::hold(Duration::from_secs(60)),
            RampStep::stop(100, 10, SEC),
        ],
        SEC,
    );
    let (scenario, _broker) = support::async_scenario(config, &registry);

    scenario
        .prepare(Duration::from_secs(15))
        .unwrap_or_else(|e| panic!("{e:#}"));
    let ramp = scenario.ramp();
    assert_eq!(ramp.len(), 2);
    assert_eq!(ramp[1].period, Duration::from_secs(5));

    scenario
        .prepare(Duration::from_millis(3500))
        .unwrap_or_else(|e| panic!("{e:#}"));
    let ramp = scenario.ramp();
    assert_eq!(ramp[0].total_users_count, 30);
    assert_eq!(ramp[1].period, Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn concurrent_stops_transition_once_and_run_returns() {
    let registry = Arc::new(Registry::default());
    let config = support::async_config(
        "stop",
        vec![
            RampStep::start(20, 10, SEC),
            RampStep::hold(Duration::from_secs(3600)),
        ],
        SEC,
    );
    let (scenario, broker) = support::async_scenario(config, &registry);
    let scenario = Arc::new(scenario);
    scenario
        .prepare(Duration::from_secs(7200))
        .unwrap_or_else(|e| panic!("{e:#}"));

    let runner = {
        let scenario = scenario.clone();
        tokio::spawn(async move { scenario.run("stop-test", "run-1").await })
    };
    tokio::time::sleep(Duration::from_secs(3)).await;

    let stoppers: Vec<_> = (0..16)
        .map(|_| {
            let scenario = scenario.clone();
            tokio::spawn(async move { scenario.stop() })
        })
        .collect();
    for stopper in stoppers {
        stopper.await.unwrap_or_else(|e| panic!("{e:#}"));
    }
    assert!(scenario.is_stopped());

    let started = Instant::now();
    runner
        .await
        .unwrap_or_else(|e| panic!("{e:#}"))
        .unwrap_or_else(|e| panic!("{e:#}"));
    assert!(started.elapsed() < Duration::from_secs(10));

    assert_eq!(scenario.state(), ScenarioState::Terminated);
    assert_eq!(scenario.active_users(), 0);
    assert_eq!(broker.opened_producers(), 20);
    assert_eq!(broker.closed_producers(), 20);

    scenario.stop();
    assert_eq!(scenario.state(), ScenarioState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn stop_before_run_skips_the_ramp() {
    let registry = Arc::new(Registry::default());
    let config = support::async_config("early", vec![RampStep::start(5, 5, SEC)], SEC);
    let (scenario, broker) = support::async_scenario(config, &registry);

    scenario
        .prepare(Duration::from_secs(10))
        .unwrap_or_else(|e| panic!("{e:#}"));
    scenario.stop();
    scenario
        .run("early-test", "run-1")
        .await
        .unwrap_or_else(|e| panic!("{e:#}"));

    assert_eq!(broker.opened_producers(), 0);
}

#[tokio::test(start_paused = true)]
async fn hold_until_stopped_waits_for_an_explicit_stop() {
    let registry = Arc::new(Registry::default());
    let mut config = support::async_config("hold", vec![RampStep::start(2, 2, SEC)], SEC);
    config.hold_until_stopped = true;
    let (scenario, _broker) = support::async_scenario(config, &registry);
    let scenario = Arc::new(scenario);
    scenario
        .prepare(Duration::from_secs(10))
        .unwrap_or_else(|e| panic!("{e:#}"));

    let runner = {
        let scenario = scenario.clone();
        tokio::spawn(async move { scenario.run("hold-test", "run-1").await })
    };

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!runner.is_finished());
    assert_eq!(scenario.state(), ScenarioState::Draining);
    assert_eq!(scenario.active_users(), 0);

    scenario.stop();
    runner
        .await
        .unwrap_or_else(|e| panic!("{e:#}"))
        .unwrap_or_else(|e| panic!("{e:#}"));
    assert_eq!(scenario.state(), ScenarioState::Terminated);
}

#[tokio::test]
async fn run_requires_prepare() {
    let registry = Arc::new(Registry::default());
    let config = support::async_config("unprepared", vec![], SEC);
    let (scenario, _broker) = support::async_scenario(config, &registry);

    let Err(err) = scenario.run("t", "r").await else {
        panic!("run without prepare must fail");
    };
    assert!(matches!(err, Error::NotPrepared(_)));
    assert_eq!(scenario.state(), ScenarioState::Idle);
}

#[tokio::test(start_paused = true)]
async fn scenario_can_be_prepared_and_run_again() {
    let registry = Arc::new(Registry::default());
    let config = support::async_config(
        "again",
        vec![RampStep::start(3, 3, SEC), RampStep::stop(3, 3, SEC)],
        SEC,
    );
    let (scenario, broker) = support::async_scenario(config, &registry);

    for round in 1..=2u64 {
        scenario
            .prepare(Duration::from_secs(10))
            .unwrap_or_else(|e| panic!("{e:#}"));
        scenario
            .run("again-test", "run")
            .await
            .unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(broker.closed_producers(), 3 * round);
    }
}
