//! Orchestrator implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{ErrorDetail, ErrorKind, Mode, Priority, Task, TaskStatus, generate_id, now_ms};
use crate::events::{SchedulerEventKind, SchedulerPayload, StatusBus, StatusEvent, spawn_status_logger};
use crate::navigator::Navigator;
use crate::planning::{Decomposer, PlannerConfig, classify_intent, normalize_url};
use crate::pool::{PoolConfig, PoolManager, PoolSnapshot, SessionFactory};
use crate::r#loop::LoopConfig;
use crate::scheduler::{SchedulerConfig, SchedulerError, TaskScheduler};

use super::dispatch::{Dispatch, ExecutionPlan, Route, SubmissionRequest, SubmissionResult};
use super::runner::GhostTaskRunner;

/// Observability snapshot over the pool and task table
#[derive(Debug, Clone)]
pub struct OrchestratorSnapshot {
    pub pool: PoolSnapshot,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Public entry point for the runtime
pub struct Orchestrator {
    bus: Arc<StatusBus>,
    pool: Arc<PoolManager>,
    scheduler: Arc<TaskScheduler>,
    runner: Arc<GhostTaskRunner>,
    decomposer: Decomposer,
    tasks: Mutex<HashMap<String, Task>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    logger: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl Orchestrator {
    /// Build the runtime: warm the pool, wire the scheduler, own the bus
    pub async fn start(config: Config, factory: Arc<dyn SessionFactory>, navigator: Arc<dyn Navigator>) -> Arc<Self> {
        let bus = Arc::new(StatusBus::with_default_capacity());
        let pool = PoolManager::start(PoolConfig::from_settings(&config.pool), factory).await;

        let planner = PlannerConfig::default();
        let runner = Arc::new(GhostTaskRunner::new(
            navigator,
            LoopConfig::from_config(&config),
            config.network.clone(),
            planner.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            pool.clone(),
            SchedulerConfig {
                max_retries: config.execution.max_retries,
            },
            config.budgets.clone(),
            runner.clone(),
        ));

        // Background consumer draining the bus into tracing
        let logger = spawn_status_logger(&bus);

        info!(pool_size = config.pool.session_count, "orchestrator started");
        Arc::new(Self {
            bus,
            pool,
            scheduler,
            runner,
            decomposer: Decomposer::new(planner),
            tasks: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            logger: Mutex::new(Some(logger)),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Subscribe to the status stream
    pub fn on_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.bus.subscribe()
    }

    /// A task record by id
    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().expect("tasks lock poisoned").get(task_id).cloned()
    }

    /// Accept a command: classify, decompose, route
    pub fn submit(self: &Arc<Self>, request: SubmissionRequest) -> SubmissionResult {
        if self.shutting_down.load(Ordering::SeqCst) {
            return SubmissionResult::rejected("orchestrator is shutting down");
        }
        let text = request.text.trim().to_string();
        if text.is_empty() {
            return SubmissionResult::rejected("empty command");
        }

        let classification = classify_intent(&text, request.mode);
        let route = Route::for_intent(classification.intent);
        let mut dispatch = Dispatch {
            dispatch_id: generate_id("dispatch", &text),
            submitted_at: now_ms(),
            source: request.source.clone(),
            mode: request.mode,
            mode_override: (request.mode != Mode::Auto).then_some(request.mode),
            workspace_context_id: None,
            raw_input: text.clone(),
            normalized_url: normalize_url(&text),
            classification: classification.clone(),
            execution_plan: ExecutionPlan::for_route(route),
            task_id: None,
        };

        match route {
            Route::TopTabNavigate => {
                // Foreground navigation: the shell drives the top tab, no
                // ghost task is spawned
                debug!(url = ?dispatch.normalized_url, "top-tab navigation dispatch");
                SubmissionResult::accepted(dispatch)
            }
            Route::MakerGenerate => {
                // The generate route belongs to the maker collaborator;
                // the core records the task and refuses to progress it
                let mut task = Task::new(&text, classification).with_priority(request.priority);
                if let Some(mode) = dispatch.mode_override {
                    task = task.with_mode_override(mode);
                }
                let task_id = task.id.clone();
                let detail = ErrorDetail::new(
                    ErrorKind::Validation,
                    "generate route is served by the maker collaborator, not the core runtime",
                );
                let emitter = self.bus.emitter_for(&task_id);
                emitter.scheduler(SchedulerPayload {
                    event: SchedulerEventKind::Failed,
                    priority: request.priority,
                    context_id: None,
                    assignment_wait_ms: 0,
                    duration_ms: 0,
                    error: Some(detail.clone()),
                });
                task.mark_failed(detail);
                self.tasks.lock().expect("tasks lock poisoned").insert(task_id.clone(), task);
                dispatch.task_id = Some(task_id);
                SubmissionResult::accepted(dispatch)
            }
            Route::GhostTask => {
                let mut plan = self.decomposer.decompose(&text, &classification);
                plan.activate();

                let mut task = Task::new(&text, classification)
                    .with_priority(request.priority)
                    .with_plan(plan.clone());
                if let Some(mode) = dispatch.mode_override {
                    task = task.with_mode_override(mode);
                }
                let task_id = task.id.clone();

                self.runner.register_plan(&task_id, plan);
                self.tasks.lock().expect("tasks lock poisoned").insert(task_id.clone(), task);
                dispatch.task_id = Some(task_id.clone());

                let orchestrator = self.clone();
                let intent = text.clone();
                let priority = request.priority;
                let handle = tokio::spawn(async move {
                    orchestrator.execute(task_id, intent, priority).await;
                });
                self.handles.lock().expect("handles lock poisoned").push(handle);

                SubmissionResult::accepted(dispatch)
            }
        }
    }

    /// Drive one ghost task through the scheduler
    async fn execute(self: Arc<Self>, task_id: String, intent: String, priority: Priority) {
        {
            let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
            match tasks.get_mut(&task_id) {
                Some(task) if !task.is_terminal() => task.mark_running(),
                _ => return,
            }
        }

        let emitter = self.bus.emitter_for(&task_id);
        let result = self.scheduler.submit(&task_id, &intent, priority, emitter).await;

        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
        let Some(task) = tasks.get_mut(&task_id) else {
            return;
        };
        let finished_plan = self.runner.plan_for(&task_id);
        self.runner.remove_plan(&task_id);
        match result {
            Ok(run) => {
                task.plan = finished_plan;
                task.mark_succeeded(run.outcome.final_url);
                info!(task_id, attempts = run.attempts_used, "task succeeded");
            }
            Err(SchedulerError::Cancelled) => {
                // cancel() already froze the partial result
                debug!(task_id, "task execution ended by cancellation");
            }
            Err(SchedulerError::Execution { detail }) => {
                if !task.is_terminal() {
                    task.plan = finished_plan;
                    task.mark_failed(detail);
                }
            }
            Err(other) => {
                if !task.is_terminal() {
                    warn!(task_id, error = %other, "task failed outside execution");
                    task.mark_failed(ErrorDetail::from_message(other.to_string()));
                }
            }
        }
    }

    /// Cancel a task; idempotent, false for unknown or terminal tasks
    pub async fn cancel(&self, task_id: &str) -> bool {
        {
            let tasks = self.tasks.lock().expect("tasks lock poisoned");
            match tasks.get(task_id) {
                Some(task) if !task.is_terminal() => {}
                _ => return false,
            }
        }

        self.scheduler.cancel(task_id).await;
        let mut partial = self.scheduler.progress_for(task_id).unwrap_or_default();
        if partial.progress_label.is_none() {
            partial.progress_label = self.task(task_id).map(|t| t.intent);
        }

        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
        if let Some(task) = tasks.get_mut(task_id)
            && !task.is_terminal()
        {
            task.mark_cancelled(partial);
            info!(task_id, "task cancelled");
            return true;
        }
        false
    }

    /// Pool + task table snapshot
    pub async fn snapshot(&self) -> OrchestratorSnapshot {
        let pool = self.pool.snapshot().await;
        let tasks = self.tasks.lock().expect("tasks lock poisoned");
        let count = |status: TaskStatus| tasks.values().filter(|t| t.status == status).count();
        OrchestratorSnapshot {
            pool,
            queued: count(TaskStatus::Queued),
            running: count(TaskStatus::Running),
            succeeded: count(TaskStatus::Succeeded),
            failed: count(TaskStatus::Failed),
            cancelled: count(TaskStatus::Cancelled),
        }
    }

    /// Refuse new submissions, wait for in-flight tasks, close the pool
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("orchestrator shutting down");

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().expect("handles lock poisoned"));
        for handle in handles {
            let _ = handle.await;
        }
        self.pool.shutdown().await;
        if let Some(logger) = self.logger.lock().expect("logger lock poisoned").take() {
            logger.abort();
        }
        info!("orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::IntentKind;
    use crate::navigator::{ActionDecision, FixtureNavigator};
    use crate::pool::StubSessionFactory;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.pool.session_count = 2;
        config.execution.max_steps = 5;
        config
    }

    async fn orchestrator(navigator: Arc<FixtureNavigator>) -> Arc<Orchestrator> {
        Orchestrator::start(test_config(), Arc::new(StubSessionFactory::new()), navigator).await
    }

    async fn wait_for_status(orchestrator: &Arc<Orchestrator>, task_id: &str, status: TaskStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if orchestrator.task(task_id).map(|t| t.status) == Some(status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("task {} never reached {:?}", task_id, status));
    }

    #[tokio::test]
    async fn test_url_submission_routes_to_top_tab() {
        let orchestrator = orchestrator(Arc::new(FixtureNavigator::new())).await;
        let result = orchestrator.submit(SubmissionRequest::new("google.com"));

        assert!(result.accepted);
        let dispatch = result.dispatch.unwrap();
        assert_eq!(dispatch.classification.intent, IntentKind::Navigate);
        assert!(dispatch.classification.confidence >= 0.95);
        assert_eq!(dispatch.execution_plan.route, Route::TopTabNavigate);
        assert_eq!(dispatch.normalized_url.as_deref(), Some("https://google.com/"));
        // No ghost task spawned
        assert!(dispatch.task_id.is_none());
        assert_eq!(orchestrator.snapshot().await.queued, 0);
    }

    #[tokio::test]
    async fn test_make_mode_refused_by_core() {
        let orchestrator = orchestrator(Arc::new(FixtureNavigator::new())).await;
        let mut rx = orchestrator.on_status();

        let result = orchestrator.submit(SubmissionRequest::new("google.com").with_mode(Mode::Make));
        let dispatch = result.dispatch.unwrap();
        assert_eq!(dispatch.classification.intent, IntentKind::Generate);
        assert_eq!(
            dispatch.classification.source,
            crate::domain::ClassificationSource::ModeOverride
        );
        assert_eq!(dispatch.classification.confidence, 1.0);
        assert_eq!(dispatch.execution_plan.route, Route::MakerGenerate);

        let task_id = dispatch.task_id.unwrap();
        let task = orchestrator.task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().message.contains("maker collaborator"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.task_id, task_id);
        match event.payload {
            crate::events::StatusPayload::Scheduler(p) => {
                assert_eq!(p.event, SchedulerEventKind::Failed);
                assert!(p.error.is_some());
            }
            other => panic!("expected SCHEDULER payload, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_research_submission_runs_to_success() {
        let navigator = Arc::new(FixtureNavigator::new());
        // Fixture default: DONE for every subtask decision
        let orchestrator = orchestrator(navigator).await;

        let result = orchestrator.submit(SubmissionRequest::new(
            "Compare prices for AirPods Pro on Amazon and Best Buy",
        ));
        let dispatch = result.dispatch.unwrap();
        assert_eq!(dispatch.classification.intent, IntentKind::Research);
        assert!(dispatch.classification.confidence >= 0.85);

        let task_id = dispatch.task_id.unwrap();
        let task = orchestrator.task(&task_id).unwrap();
        assert!(task.plan.as_ref().unwrap().len() >= 3);

        wait_for_status(&orchestrator, &task_id, TaskStatus::Succeeded).await;
        let task = orchestrator.task(&task_id).unwrap();
        assert!(task.finished_at.is_some());
        assert!(task.started_at.is_some());
    }

    #[tokio::test]
    async fn test_empty_submission_rejected() {
        let orchestrator = orchestrator(Arc::new(FixtureNavigator::new())).await;
        let result = orchestrator.submit(SubmissionRequest::new("   "));
        assert!(!result.accepted);
        assert!(result.error.unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let orchestrator = orchestrator(Arc::new(FixtureNavigator::new())).await;
        assert!(!orchestrator.cancel("task-nope").await);
    }

    #[tokio::test]
    async fn test_cancel_running_task_freezes_partial() {
        let navigator = Arc::new(FixtureNavigator::new());
        // Slow inference keeps the task running while we cancel it
        navigator.set_delay(Duration::from_millis(100));
        for _ in 0..50 {
            navigator.push(ActionDecision::wait(0.9, "waiting for content"));
        }
        let orchestrator = orchestrator(navigator).await;

        let result = orchestrator.submit(SubmissionRequest::new("open a.com then extract the data and then verify it"));
        let task_id = result.task_id().unwrap().to_string();

        wait_for_status(&orchestrator, &task_id, TaskStatus::Running).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(orchestrator.cancel(&task_id).await);
        let task = orchestrator.task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        let partial = task.partial.unwrap();
        assert!(partial.progress_label.is_some());

        // Second cancel is not re-entered
        assert!(!orchestrator.cancel(&task_id).await);

        // Pool replenishes after the destroyed session
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if orchestrator.snapshot().await.pool.available >= 1 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("pool should replenish after cancel");
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_submissions() {
        let orchestrator = orchestrator(Arc::new(FixtureNavigator::new())).await;
        orchestrator.shutdown().await;

        let result = orchestrator.submit(SubmissionRequest::new("compare a and b and c"));
        assert!(!result.accepted);
        assert!(result.error.unwrap().contains("shutting down"));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_tasks() {
        let orchestrator = orchestrator(Arc::new(FixtureNavigator::new())).await;
        let result = orchestrator.submit(SubmissionRequest::new("compare a and b and then extract both"));
        let task_id = result.task_id().unwrap().to_string();

        orchestrator.shutdown().await;
        // The in-flight task completed before shutdown returned
        let task = orchestrator.task(&task_id).unwrap();
        assert!(task.is_terminal());
    }
}
