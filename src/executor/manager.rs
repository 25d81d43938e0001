//! Orchestration of a test run
//!
//! The manager builds the instance pool, then drives a run through four
//! phases:
//!
//! 1. view activation (views keep running until the end)
//! 2. instance setup barrier
//! 3. instance execute barrier, skipped once the run is terminating
//! 4. view deactivation
//!
//! Per-instance and per-view failures are collected into the shared state,
//! never raised. Only configuration errors and a broken worker pool escape.

use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::instance::InstanceFactory;
use super::pool::InstancePool;
use super::state::SharedRunState;
use super::view::View;
use crate::config::{ConfigError, PostTestBehavior, RunConfig};
use crate::models::{Detection, Failure, InstanceState, Participant, Phase, ViewState};
use crate::utils::Stopwatch;

/// Errors that abort a run
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("execute called without a successful setup")]
    NotSetUp,

    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

/// Typed result of one task submitted to a phase
#[derive(Debug)]
struct TaskOutcome {
    participant: Participant,
    result: Result<(), String>,
}

impl TaskOutcome {
    fn new(participant: Participant, result: anyhow::Result<()>) -> Self {
        Self {
            participant,
            result: result.map_err(|e| format!("{e:#}")),
        }
    }
}

/// Turn the joined tasks of a phase into outcomes.
///
/// A panicking task counts as a failure of its participant. A task cancelled
/// by the runtime means the worker pool itself is gone.
fn collect_outcomes(
    participants: Vec<Participant>,
    joined: Vec<Result<TaskOutcome, JoinError>>,
) -> Result<Vec<TaskOutcome>, OrchestrationError> {
    participants
        .into_iter()
        .zip(joined)
        .map(|(participant, joined)| match joined {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_panic() => Ok(TaskOutcome {
                participant,
                result: Err("worker panicked".to_string()),
            }),
            Err(e) => Err(OrchestrationError::WorkerPool(e.to_string())),
        })
        .collect()
}

/// Watches for an interrupt and terminates the run when it arrives
fn spawn_interrupt_handler<F>(
    interrupt: F,
    state: Arc<SharedRunState>,
    behavior: PostTestBehavior,
) -> JoinHandle<()>
where
    F: Future + Send + 'static,
    F::Output: Send,
{
    tokio::spawn(async move {
        interrupt.await;
        warn!("Interrupt received, shutting down test run...");
        state.interrupt();

        if behavior.may_pause() {
            warn!("*******************************");
            warn!("If testing is paused while you debug a detection, press ENTER to complete shutdown.");
            warn!("*******************************");
            state.release_pauses();
        }
    })
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Drives a pool of instances and a set of views through one test run
pub struct OrchestrationManager {
    factory: Arc<dyn InstanceFactory>,
    state: Arc<SharedRunState>,
    pool: Option<InstancePool>,
    views: Vec<Arc<dyn View>>,
    behavior: PostTestBehavior,
}

impl OrchestrationManager {
    pub fn new(factory: Arc<dyn InstanceFactory>) -> Self {
        Self {
            factory,
            state: Arc::new(SharedRunState::new()),
            pool: None,
            views: Vec::new(),
            behavior: PostTestBehavior::NeverPause,
        }
    }

    /// State shared with instances and views
    pub fn state(&self) -> Arc<SharedRunState> {
        Arc::clone(&self.state)
    }

    /// Build the instance pool and queue the content.
    ///
    /// On a configuration error nothing is started, the views are stopped
    /// and the error is returned.
    pub async fn setup(
        &mut self,
        config: &RunConfig,
        content: Vec<Detection>,
        views: Vec<Arc<dyn View>>,
    ) -> Result<(), OrchestrationError> {
        self.behavior = config.post_test_behavior;

        // View lifecycle entries are keyed by name
        let mut seen = HashSet::new();
        if let Some(view) = views.iter().find(|v| !seen.insert(v.name().to_string())) {
            let e = ConfigError::DuplicateViewName(view.name().to_string());
            self.views = views;
            return self.abort_setup(e).await;
        }

        for view in &views {
            self.state.register_view(view.name());
        }
        self.views = views;

        match InstancePool::build(config, &self.state, self.factory.as_ref()) {
            Ok(pool) => {
                info!(
                    "Queued {} detections for {} instances",
                    content.len(),
                    pool.len()
                );
                self.state.install_content(content);
                self.pool = Some(pool);
                Ok(())
            }
            Err(e) => self.abort_setup(e).await,
        }
    }

    /// Terminate a run whose configuration was rejected, stopping the supplied views
    async fn abort_setup(&mut self, e: ConfigError) -> Result<(), OrchestrationError> {
        error!("Invalid run configuration: {}", e);
        self.state.mark_terminated();
        self.stop_views().await?;
        Err(e.into())
    }

    /// Run all phases, terminating early on Ctrl-C
    pub async fn execute(&mut self) -> Result<Arc<SharedRunState>, OrchestrationError> {
        self.execute_with_interrupt(ctrl_c()).await
    }

    /// Run all phases, treating completion of `interrupt` as an operator interrupt
    pub async fn execute_with_interrupt<F>(
        &mut self,
        interrupt: F,
    ) -> Result<Arc<SharedRunState>, OrchestrationError>
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        let pool = self.pool.take().ok_or(OrchestrationError::NotSetUp)?;
        let interrupt_handler =
            spawn_interrupt_handler(interrupt, Arc::clone(&self.state), self.behavior);
        let mut stopwatch = Stopwatch::new();

        let view_tasks = self.activate_views();

        let result = self.run_instances(&pool, &mut stopwatch).await;
        self.state.mark_terminated();

        // Views are torn down even when the worker pool broke
        let stopped = self.stop_views().await;
        let finished = self.await_view_tasks(view_tasks).await;
        stopwatch.lap("views");
        interrupt_handler.abort();

        result?;
        stopped?;
        finished?;

        debug!("Phase timings:\n{}", stopwatch.format());
        info!("Test run {}", self.state.completion());
        Ok(self.state())
    }

    /// Phases 2 and 3
    async fn run_instances(
        &self,
        pool: &InstancePool,
        stopwatch: &mut Stopwatch,
    ) -> Result<(), OrchestrationError> {
        info!("Setting up {} instances", pool.len());
        let setup_failures = self.instance_barrier(pool, Phase::InstanceSetup).await?;
        stopwatch.lap("setup");

        if setup_failures > 0 {
            error!(
                "{} of {} instances failed setup, skipping test execution",
                setup_failures,
                pool.len()
            );
            self.state.mark_terminated();
        }

        if self.state.is_terminated() {
            return Ok(());
        }

        info!("Executing tests on {} instances", pool.len());
        let execute_failures = self.instance_barrier(pool, Phase::InstanceExecute).await?;
        stopwatch.lap("execute");

        if execute_failures > 0 {
            warn!("{} instances failed during execution", execute_failures);
        }
        Ok(())
    }

    /// Submit one call per instance and wait for every one of them.
    ///
    /// Returns the number of failed instances.
    async fn instance_barrier(
        &self,
        pool: &InstancePool,
        phase: Phase,
    ) -> Result<usize, OrchestrationError> {
        let semaphore = Arc::new(Semaphore::new(pool.len()));
        let mut handles = Vec::with_capacity(pool.len());
        let mut participants = Vec::with_capacity(pool.len());

        for member in pool.members() {
            let semaphore = Arc::clone(&semaphore);
            let state = Arc::clone(&self.state);
            let instance = Arc::clone(&member.instance);
            let name = member.name.clone();
            participants.push(Participant::Instance(name.clone()));

            handles.push(tokio::spawn(async move {
                let participant = Participant::Instance(name.clone());
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return TaskOutcome::new(participant, Err(anyhow::anyhow!("worker pool closed")));
                };

                let (running, finished) = match phase {
                    Phase::InstanceSetup => (InstanceState::SetupInProgress, InstanceState::Ready),
                    _ => (InstanceState::Executing, InstanceState::Done),
                };
                state.set_instance_state(&name, running);

                let result = match phase {
                    Phase::InstanceSetup => instance.setup().await,
                    _ => instance.execute().await,
                };

                let next = if result.is_ok() { finished } else { InstanceState::Failed };
                state.set_instance_state(&name, next);
                TaskOutcome::new(participant, result)
            }));
        }

        let outcomes = collect_outcomes(participants, join_all(handles).await)?;
        Ok(self.record(outcomes, phase))
    }

    /// Phase 1: start every view without waiting for it
    fn activate_views(&self) -> Vec<JoinHandle<TaskOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.views.len().max(1)));

        self.views
            .iter()
            .map(|view| {
                let semaphore = Arc::clone(&semaphore);
                let state = Arc::clone(&self.state);
                let view = Arc::clone(view);
                self.state.set_view_state(view.name(), ViewState::Active);

                tokio::spawn(async move {
                    let participant = Participant::View(view.name().to_string());
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return TaskOutcome::new(participant, Err(anyhow::anyhow!("worker pool closed")));
                    };
                    TaskOutcome::new(participant, view.setup(state).await)
                })
            })
            .collect()
    }

    /// Phase 4: stop every view exactly once, on its own pool
    async fn stop_views(&mut self) -> Result<(), OrchestrationError> {
        let views = std::mem::take(&mut self.views);
        if views.is_empty() {
            return Ok(());
        }

        info!("Stopping {} views", views.len());
        let semaphore = Arc::new(Semaphore::new(views.len()));
        let participants = views
            .iter()
            .map(|v| Participant::View(v.name().to_string()))
            .collect();

        let handles: Vec<_> = views
            .iter()
            .map(|view| {
                let semaphore = Arc::clone(&semaphore);
                let state = Arc::clone(&self.state);
                let view = Arc::clone(view);

                tokio::spawn(async move {
                    let participant = Participant::View(view.name().to_string());
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return TaskOutcome::new(participant, Err(anyhow::anyhow!("worker pool closed")));
                    };
                    let result = view.stop(Arc::clone(&state)).await;
                    state.set_view_state(view.name(), ViewState::Stopped);
                    TaskOutcome::new(participant, result)
                })
            })
            .collect();

        let outcomes = collect_outcomes(participants, join_all(handles).await)?;
        self.record(outcomes, Phase::ViewStop);
        Ok(())
    }

    /// Wait for the phase 1 tasks, which end once their views notice the stop
    async fn await_view_tasks(
        &self,
        tasks: Vec<JoinHandle<TaskOutcome>>,
    ) -> Result<(), OrchestrationError> {
        if tasks.is_empty() {
            return Ok(());
        }

        let participants = self
            .state
            .view_states()
            .into_iter()
            .map(|(name, _)| Participant::View(name))
            .collect();
        let outcomes = collect_outcomes(participants, join_all(tasks).await)?;
        self.record(outcomes, Phase::ViewSetup);
        debug!("All views finished");
        Ok(())
    }

    /// Store failures in the shared state and return how many there were
    fn record(&self, outcomes: Vec<TaskOutcome>, phase: Phase) -> usize {
        let mut failures = 0;
        for outcome in outcomes {
            match outcome.result {
                Ok(()) => debug!("{} completed {}", outcome.participant, phase),
                Err(message) => {
                    failures += 1;
                    error!("{} failed during {}: {}", outcome.participant, phase, message);
                    match &outcome.participant {
                        Participant::Instance(name) => {
                            self.state.set_instance_state(name, InstanceState::Failed)
                        }
                        Participant::View(name) if phase == Phase::ViewStop => {
                            self.state.set_view_state(name, ViewState::Stopped)
                        }
                        Participant::View(_) => {}
                    }
                    self.state
                        .record_failure(Failure::new(outcome.participant, phase, message));
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::instance::Instance;
    use crate::executor::pool::InstanceConfig;
    use crate::models::{Completion, DetectionResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Events = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Copy, Default)]
    enum Fault {
        #[default]
        None,
        FailSetup,
        PanicSetup,
        SlowSetup,
        FailExecute,
        PauseExecute,
    }

    struct ScriptedInstance {
        state: Arc<SharedRunState>,
        events: Events,
        faults: Vec<(usize, Fault)>,
        index: usize,
        name: String,
    }

    impl ScriptedInstance {
        fn fault(&self) -> Fault {
            self.faults
                .iter()
                .find(|(i, _)| *i == self.index)
                .map(|(_, f)| *f)
                .unwrap_or_default()
        }

        fn log(&self, event: &str) {
            self.events.lock().unwrap().push(format!("{}:{}", event, self.name));
        }
    }

    #[async_trait]
    impl Instance for ScriptedInstance {
        fn configure(&mut self, config: InstanceConfig) {
            self.index = config.index;
            self.name = config.name().to_string();
        }

        async fn setup(&self) -> anyhow::Result<()> {
            self.log("setup-start");
            // Later instances finish setup later
            tokio::time::sleep(Duration::from_millis(10 * self.index as u64)).await;
            match self.fault() {
                Fault::FailSetup => anyhow::bail!("container failed to start"),
                Fault::PanicSetup => panic!("setup blew up"),
                Fault::SlowSetup => tokio::time::sleep(Duration::from_millis(200)).await,
                _ => {}
            }
            self.log("setup-done");
            Ok(())
        }

        async fn execute(&self) -> anyhow::Result<()> {
            self.log("execute-start");
            match self.fault() {
                Fault::FailExecute => anyhow::bail!("lost connection"),
                Fault::PauseExecute => {
                    let released = self.state.pause_released();
                    if !self.state.is_interrupted() {
                        released.await;
                    }
                    return Ok(());
                }
                _ => {}
            }
            while !self.state.is_terminated() {
                let Some(detection) = self.state.pop() else {
                    break;
                };
                self.state
                    .record_result(DetectionResult::pass(&detection, &self.name, 1));
                tokio::task::yield_now().await;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedFactory {
        events: Events,
        faults: Vec<(usize, Fault)>,
    }

    impl ScriptedFactory {
        fn with_fault(mut self, index: usize, fault: Fault) -> Self {
            self.faults.push((index, fault));
            self
        }
    }

    impl InstanceFactory for ScriptedFactory {
        fn create(&self, state: Arc<SharedRunState>) -> Box<dyn Instance> {
            Box::new(ScriptedInstance {
                state,
                events: Arc::clone(&self.events),
                faults: self.faults.clone(),
                index: 0,
                name: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct CountingView {
        name: String,
        fail: bool,
        setups: AtomicUsize,
        stops: AtomicUsize,
        terminated_at_stop: AtomicUsize,
    }

    impl CountingView {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ..Default::default()
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail: true,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl View for CountingView {
        fn name(&self) -> &str {
            &self.name
        }

        async fn setup(&self, state: Arc<SharedRunState>) -> anyhow::Result<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("display unavailable");
            }
            state.terminated().await;
            Ok(())
        }

        async fn stop(&self, state: Arc<SharedRunState>) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if state.is_terminated() {
                self.terminated_at_stop.fetch_add(1, Ordering::SeqCst);
            }
            if self.fail {
                anyhow::bail!("display unavailable");
            }
            Ok(())
        }
    }

    fn config(containers: usize) -> RunConfig {
        RunConfig::default()
            .with_containers(containers)
            .with_name_template("c-%d")
            .with_behavior(PostTestBehavior::NeverPause)
    }

    fn content(n: usize) -> Vec<Detection> {
        (0..n)
            .map(|i| Detection::new(format!("d{i}"), format!("detections/d{i}.yml")))
            .collect()
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    fn position(events: &[String], prefix: &str) -> Vec<usize> {
        events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }

    async fn run(
        factory: ScriptedFactory,
        config: RunConfig,
        views: Vec<Arc<dyn View>>,
    ) -> (Arc<SharedRunState>, Events) {
        let events = Arc::clone(&factory.events);
        let mut manager = OrchestrationManager::new(Arc::new(factory));
        manager.setup(&config, content(20), views).await.unwrap();
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            manager.execute_with_interrupt(never()),
        )
        .await
        .expect("run did not finish")
        .unwrap();
        (state, events)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_setup_barrier_precedes_execution() {
        let (state, events) = run(ScriptedFactory::default(), config(3), vec![]).await;
        let events = events.lock().unwrap().clone();

        let setups_done = position(&events, "setup-done");
        let executes = position(&events, "execute-start");
        assert_eq!(setups_done.len(), 3);
        assert_eq!(executes.len(), 3);
        assert!(setups_done.iter().max() < executes.iter().min());

        assert_eq!(state.completed(), 20);
        assert_eq!(state.pending(), 0);
        assert_eq!(state.completion(), Completion::Finished);
        assert!(state
            .instance_states()
            .iter()
            .all(|(_, s)| *s == InstanceState::Done));
    }

    #[tokio::test]
    async fn test_failed_setup_skips_execution() {
        let view = CountingView::new("watch");
        let factory = ScriptedFactory::default().with_fault(1, Fault::FailSetup);
        let (state, events) = run(factory, config(3), vec![view.clone() as Arc<dyn View>]).await;
        let events = events.lock().unwrap().clone();

        // The barrier waits for every setup, including the one finishing after the failure
        assert_eq!(position(&events, "setup-start").len(), 3);
        assert!(events.contains(&"setup-done:c-0".to_string()));
        assert!(events.contains(&"setup-done:c-2".to_string()));
        assert!(!events.contains(&"setup-done:c-1".to_string()));
        assert!(position(&events, "execute-start").is_empty());
        assert_eq!(state.completion(), Completion::SetupFailed);
        assert_eq!(state.pending(), 20);

        let failures = state.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].participant, Participant::Instance("c-1".to_string()));
        assert_eq!(failures[0].phase, Phase::InstanceSetup);
        assert!(failures[0].message.contains("container failed to start"));

        assert_eq!(view.stops.load(Ordering::SeqCst), 1);
        assert!(state.summary().has_failures());
    }

    #[tokio::test]
    async fn test_setup_panic_is_recorded() {
        let factory = ScriptedFactory::default().with_fault(0, Fault::PanicSetup);
        let (state, _) = run(factory, config(2), vec![]).await;

        let failures = state.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "worker panicked");
        assert_eq!(state.instance_states()[0].1, InstanceState::Failed);
        assert_eq!(state.completion(), Completion::SetupFailed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_execute_failure_is_isolated() {
        let factory = ScriptedFactory::default().with_fault(0, Fault::FailExecute);
        let (state, _) = run(factory, config(3), vec![]).await;

        assert_eq!(state.completed(), 20);
        let failures = state.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].phase, Phase::InstanceExecute);

        let states = state.instance_states();
        assert_eq!(states[0].1, InstanceState::Failed);
        assert_eq!(states[1].1, InstanceState::Done);
        assert_eq!(states[2].1, InstanceState::Done);
    }

    #[tokio::test]
    async fn test_views_run_for_whole_run_and_stop_once() {
        let first = CountingView::new("first");
        let second = CountingView::new("second");
        let (state, _) = run(
            ScriptedFactory::default(),
            config(2),
            vec![first.clone() as Arc<dyn View>, second.clone()],
        )
        .await;

        assert!(state.is_terminated());
        for view in [&first, &second] {
            assert_eq!(view.setups.load(Ordering::SeqCst), 1);
            assert_eq!(view.stops.load(Ordering::SeqCst), 1);
            assert_eq!(view.terminated_at_stop.load(Ordering::SeqCst), 1);
        }
        assert!(state
            .view_states()
            .iter()
            .all(|(_, s)| *s == ViewState::Stopped));
    }

    #[tokio::test]
    async fn test_view_failures_do_not_fail_the_run() {
        let broken = CountingView::failing("broken");
        let (state, _) = run(ScriptedFactory::default(), config(2), vec![broken.clone() as Arc<dyn View>]).await;

        assert_eq!(state.completed(), 20);
        assert_eq!(state.completion(), Completion::Finished);

        let failures = state.failures();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| !f.is_instance_failure()));
        assert!(!state.summary().has_failures());
        assert_eq!(broken.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_configuration_error_stops_views() {
        let view = CountingView::new("watch");
        let mut manager = OrchestrationManager::new(Arc::new(ScriptedFactory::default()));

        let err = manager
            .setup(&config(2).with_target("server"), content(3), vec![view.clone() as Arc<dyn View>])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Config(ConfigError::UnsupportedTarget(_))
        ));

        let state = manager.state();
        assert!(state.is_terminated());
        assert!(state.instance_states().is_empty());
        assert_eq!(view.setups.load(Ordering::SeqCst), 0);
        assert_eq!(view.stops.load(Ordering::SeqCst), 1);

        assert!(matches!(
            manager.execute_with_interrupt(never()).await,
            Err(OrchestrationError::NotSetUp)
        ));
        assert_eq!(view.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_view_names_are_rejected() {
        let first = CountingView::new("watch");
        let second = CountingView::new("watch");
        let mut manager = OrchestrationManager::new(Arc::new(ScriptedFactory::default()));

        let err = manager
            .setup(
                &config(2),
                content(3),
                vec![first.clone() as Arc<dyn View>, second.clone()],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Config(ConfigError::DuplicateViewName(ref name)) if name == "watch"
        ));

        let state = manager.state();
        assert!(state.is_terminated());
        assert!(state.instance_states().is_empty());
        assert!(state.view_states().is_empty());
        for view in [&first, &second] {
            assert_eq!(view.setups.load(Ordering::SeqCst), 0);
            assert_eq!(view.stops.load(Ordering::SeqCst), 1);
        }

        assert!(matches!(
            manager.execute_with_interrupt(never()).await,
            Err(OrchestrationError::NotSetUp)
        ));
    }

    #[tokio::test]
    async fn test_interrupt_during_setup_skips_execution() {
        let view = CountingView::new("watch");
        let factory = ScriptedFactory::default().with_fault(0, Fault::SlowSetup);
        let events = Arc::clone(&factory.events);

        let mut manager = OrchestrationManager::new(Arc::new(factory));
        manager
            .setup(&config(2), content(5), vec![view.clone() as Arc<dyn View>])
            .await
            .unwrap();
        let state = manager
            .execute_with_interrupt(tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();

        assert!(state.is_interrupted());
        assert_eq!(state.completion(), Completion::Interrupted);

        // The slow setup still ran to completion before the barrier released
        let events = events.lock().unwrap().clone();
        assert!(events.contains(&"setup-done:c-0".to_string()));
        assert!(events.contains(&"setup-done:c-1".to_string()));
        assert!(position(&events, "execute-start").is_empty());
        assert_eq!(state.pending(), 5);
        assert_eq!(view.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interrupt_releases_paused_instances() {
        let factory = ScriptedFactory::default().with_fault(0, Fault::PauseExecute);
        let mut manager = OrchestrationManager::new(Arc::new(factory));
        manager
            .setup(
                &config(1).with_behavior(PostTestBehavior::AlwaysPause),
                content(1),
                vec![],
            )
            .await
            .unwrap();

        let state = tokio::time::timeout(
            Duration::from_secs(2),
            manager.execute_with_interrupt(tokio::time::sleep(Duration::from_millis(20))),
        )
        .await
        .expect("paused instance was not released")
        .unwrap();

        assert!(state.is_interrupted());
        assert!(state.failures().is_empty());
    }

    #[tokio::test]
    async fn test_empty_content_finishes() {
        let mut manager = OrchestrationManager::new(Arc::new(ScriptedFactory::default()));
        manager.setup(&config(2), vec![], vec![]).await.unwrap();
        let state = manager.execute_with_interrupt(never()).await.unwrap();

        assert!(state.is_terminated());
        assert_eq!(state.completed(), 0);
        assert_eq!(state.completion(), Completion::Finished);
    }
}
