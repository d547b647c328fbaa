use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use surge_http::HttpClient;
use surge_metrics::{MetricsSink, NoopSink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::ramp::{RampAction, RampStep, fit_to_budget};
use super::vu::{UserEnv, VirtualUser};
use crate::config::{ScenarioConfig, ScenarioKind};
use crate::correlation::{AsyncSettings, CorrelationStore, DEFAULT_CORRELATION_PATTERN};
use crate::error::{Error, Result};
use crate::executor::{AsyncSteps, HttpSteps, StepExecutor};
use crate::transport::{MessageConsumer, ProducerFactory};

/// Lifecycle of a scenario. Only moves forward, except that a finished scenario may be
/// prepared again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScenarioState {
    Idle,
    Prepared,
    Running,
    /// Ramp finished; waiting for users to exit.
    Draining,
    Terminated,
}

/// Both halves of a messaging backend for one async scenario.
pub struct AsyncTransport {
    pub producers: Arc<dyn ProducerFactory>,
    pub consumer: Box<dyn MessageConsumer>,
}

impl AsyncTransport {
    pub fn new(producers: Arc<dyn ProducerFactory>, consumer: Box<dyn MessageConsumer>) -> Self {
        Self {
            producers,
            consumer,
        }
    }
}

/// External collaborators a scenario needs.
pub struct ScenarioResources {
    pub metrics: Arc<dyn MetricsSink>,
    pub http_client: Option<Arc<HttpClient>>,
    pub transport: Option<AsyncTransport>,
}

impl Default for ScenarioResources {
    fn default() -> Self {
        Self {
            metrics: Arc::new(NoopSink),
            http_client: None,
            transport: None,
        }
    }
}

impl ScenarioResources {
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, client: Arc<HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: AsyncTransport) -> Self {
        self.transport = Some(transport);
        self
    }
}

/// Signals for one run, replaced on every `prepare`.
#[derive(Debug, Clone, Default)]
struct RunSignals {
    /// Fired once by `stop()`.
    stop: CancellationToken,
    /// Parent of every user's token.
    users: CancellationToken,
    tracker: TaskTracker,
}

#[derive(Default)]
struct Background {
    ingestion: Option<JoinHandle<Box<dyn MessageConsumer>>>,
    eviction: Option<JoinHandle<()>>,
}

struct RunningUser {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Ramps a population of virtual users through timed stages.
pub struct Scenario {
    config: ScenarioConfig,
    executor: StepExecutor,
    metrics: Arc<dyn MetricsSink>,
    consumer: Mutex<Option<Box<dyn MessageConsumer>>>,

    ramp: Mutex<Vec<RampStep>>,
    signals: Mutex<RunSignals>,
    state: Mutex<ScenarioState>,
    stopped: AtomicBool,
    running: Mutex<VecDeque<RunningUser>>,
    active: Arc<AtomicU64>,
    next_user_id: AtomicU64,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.config.name)
            .field("kind", &self.config.kind)
            .field("state", &self.state())
            .field("active_users", &self.active_users())
            .finish_non_exhaustive()
    }
}

impl Scenario {
    pub fn new(config: ScenarioConfig, resources: ScenarioResources) -> Result<Self> {
        config.validate()?;

        let ScenarioResources {
            metrics,
            http_client,
            transport,
        } = resources;

        let (executor, consumer) = match config.kind {
            ScenarioKind::Http => {
                let client = http_client.unwrap_or_else(|| Arc::new(HttpClient::default()));
                (StepExecutor::Http(HttpSteps::new(client)), None)
            }
            ScenarioKind::Async => {
                let transport =
                    transport.ok_or_else(|| Error::MissingTransport(config.name.to_string()))?;
                let settings = match config.async_settings.clone() {
                    Some(settings) => settings,
                    None => AsyncSettings::new(DEFAULT_CORRELATION_PATTERN)?,
                };
                let store = Arc::new(CorrelationStore::new(settings.poll_interval));
                let executor = StepExecutor::Async(AsyncSteps::new(
                    Arc::new(settings),
                    store,
                    transport.producers,
                ));
                (executor, Some(transport.consumer))
            }
        };

        Ok(Self {
            ramp: Mutex::new(config.ramp.clone()),
            config,
            executor,
            metrics,
            consumer: Mutex::new(consumer),
            signals: Mutex::new(RunSignals::default()),
            state: Mutex::new(ScenarioState::Idle),
            stopped: AtomicBool::new(false),
            running: Mutex::new(VecDeque::new()),
            active: Arc::new(AtomicU64::new(0)),
            next_user_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn state(&self) -> ScenarioState {
        *lock(&self.state)
    }

    /// Users currently inside their loop.
    pub fn active_users(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Ramp steps as they will run, after `prepare`.
    pub fn ramp(&self) -> Vec<RampStep> {
        lock(&self.ramp).clone()
    }

    /// Correlation store of an async scenario.
    pub fn correlation_store(&self) -> Option<&Arc<CorrelationStore>> {
        match &self.executor {
            StepExecutor::Async(messaging) => Some(messaging.store()),
            StepExecutor::Http(_) => None,
        }
    }

    /// Fits the ramp into `total_duration` and arms fresh stop signals.
    pub fn prepare(&self, total_duration: Duration) -> Result<()> {
        let mut state = lock(&self.state);
        match *state {
            ScenarioState::Idle | ScenarioState::Prepared | ScenarioState::Terminated => {}
            ScenarioState::Running | ScenarioState::Draining => {
                return Err(Error::AlreadyRunning(self.config.name.to_string()));
            }
        }

        if self.config.kind == ScenarioKind::Async && lock(&self.consumer).is_none() {
            return Err(Error::MissingTransport(self.config.name.to_string()));
        }

        let fitted = fit_to_budget(&self.config.ramp, total_duration);
        tracing::debug!(
            scenario = %self.config.name,
            steps = fitted.len(),
            total_duration = ?total_duration,
            "scenario prepared"
        );

        *lock(&self.ramp) = fitted;
        *lock(&self.signals) = RunSignals::default();
        self.stopped.store(false, Ordering::Release);
        *state = ScenarioState::Prepared;
        Ok(())
    }

    /// Runs the prepared ramp to completion and waits for every user to exit.
    ///
    /// Returns the wall-clock start time.
    pub async fn run(&self, test: &str, run_id: &str) -> Result<SystemTime> {
        {
            let mut state = lock(&self.state);
            match *state {
                ScenarioState::Prepared => *state = ScenarioState::Running,
                ScenarioState::Running | ScenarioState::Draining => {
                    return Err(Error::AlreadyRunning(self.config.name.to_string()));
                }
                ScenarioState::Idle | ScenarioState::Terminated => {
                    return Err(Error::NotPrepared(self.config.name.to_string()));
                }
            }
        }

        let started_at = SystemTime::now();
        let signals = lock(&self.signals).clone();
        let ramp = self.ramp();
        let env = Arc::new(UserEnv {
            test: Arc::from(test),
            scenario: self.config.name.clone(),
            script: self.config.script.clone(),
            executor: self.executor.clone(),
            metrics: self.metrics.clone(),
            pacing: self.config.pacing,
            pacing_delta: self.config.pacing_delta,
            seed: self.config.seed,
            active: self.active.clone(),
        });

        tracing::info!(test, run_id, scenario = %self.config.name, "scenario started");

        let background_cancel = CancellationToken::new();
        let background_tasks = self.spawn_background(&background_cancel);

        for (index, step) in ramp.iter().enumerate() {
            if self.is_stopped() {
                tracing::info!(
                    test,
                    scenario = %self.config.name,
                    "stop requested; remaining ramp steps skipped"
                );
                break;
            }

            tracing::debug!(
                test,
                scenario = %self.config.name,
                index,
                action = %step.action,
                users = step.total_users_count,
                period = ?step.period,
                "ramp step"
            );

            match step.action {
                RampAction::Start => self.launch(step, &env, &signals).await,
                RampAction::Duration => {
                    tokio::select! {
                        _ = tokio::time::sleep(step.period) => {}
                        _ = signals.stop.cancelled() => {}
                    }
                }
                RampAction::Stop => self.retire(step, &signals).await,
            }
        }

        *lock(&self.state) = ScenarioState::Draining;
        signals.users.cancel();

        if !self.is_stopped() {
            if self.config.hold_until_stopped {
                signals.stop.cancelled().await;
            } else {
                self.stop();
            }
        }

        signals.tracker.close();
        signals.tracker.wait().await;
        lock(&self.running).clear();

        background_cancel.cancel();
        let joined = self.join_background(background_tasks).await;

        *lock(&self.state) = ScenarioState::Terminated;
        joined?;
        tracing::info!(test, run_id, scenario = %self.config.name, "scenario finished");
        Ok(started_at)
    }

    /// Ends the run: no further ramp steps start and any hold returns early.
    ///
    /// Only the first call has an effect.
    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(scenario = %self.config.name, "scenario stop requested");
            lock(&self.signals).stop.cancel();
        }
    }

    fn spawn_background(&self, cancel: &CancellationToken) -> Background {
        let StepExecutor::Async(messaging) = &self.executor else {
            return Background::default();
        };
        let settings = messaging.settings();

        let ingestion = lock(&self.consumer).take().map(|consumer| {
            messaging.store().spawn_ingestion(
                consumer,
                settings.correlation.clone(),
                cancel.clone(),
            )
        });
        let eviction = messaging.store().spawn_eviction(
            settings.sweep_period,
            settings.eviction_age,
            cancel.clone(),
        );

        Background {
            ingestion,
            eviction: Some(eviction),
        }
    }

    async fn join_background(&self, background: Background) -> Result<()> {
        let ingestion = match background.ingestion {
            Some(handle) => handle
                .await
                .map(|consumer| *lock(&self.consumer) = Some(consumer)),
            None => Ok(()),
        };
        let eviction = match background.eviction {
            Some(handle) => handle.await,
            None => Ok(()),
        };
        ingestion?;
        eviction?;
        Ok(())
    }

    async fn launch(&self, step: &RampStep, env: &Arc<UserEnv>, signals: &RunSignals) {
        for size in step.batch_sizes() {
            if self.is_stopped() {
                return;
            }

            {
                let mut running = lock(&self.running);
                for _ in 0..size {
                    let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
                    let stop = signals.users.child_token();
                    let user = VirtualUser::new(id, env.clone(), stop.clone());
                    let handle = signals.tracker.spawn(user.run());
                    running.push_back(RunningUser { stop, handle });
                }
            }
            tracing::info!(
                test = %env.test,
                scenario = %self.config.name,
                launched = size,
                "user batch launched"
            );

            tokio::select! {
                _ = tokio::time::sleep(step.period) => {}
                _ = signals.stop.cancelled() => return,
            }
        }
    }

    async fn retire(&self, step: &RampStep, signals: &RunSignals) {
        let mut retiring = Vec::new();

        for size in step.batch_sizes() {
            let batch: Vec<RunningUser> = {
                let mut running = lock(&self.running);
                let take = usize::try_from(size)
                    .unwrap_or(usize::MAX)
                    .min(running.len());
                (0..take).filter_map(|_| running.pop_back()).collect()
            };
            if batch.is_empty() {
                tracing::debug!(scenario = %self.config.name, "no running users left to retire");
                break;
            }

            for user in &batch {
                user.stop.cancel();
            }
            tracing::info!(
                scenario = %self.config.name,
                retired = batch.len(),
                "user batch signalled to stop"
            );
            retiring.extend(batch);

            tokio::select! {
                _ = tokio::time::sleep(step.period) => {}
                _ = signals.stop.cancelled() => break,
            }
        }

        for user in retiring {
            if let Err(err) = user.handle.await {
                tracing::error!(scenario = %self.config.name, error = %err, "virtual user task failed");
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
