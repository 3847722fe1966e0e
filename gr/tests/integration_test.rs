//! Integration tests for Ghostrun
//!
//! End-to-end scenarios over stub capabilities plus property tests for
//! the universal invariants: state-machine legality, terminality, lease
//! conservation, priority discipline, and decomposition roundtrip.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use ghostrun::config::Config;
use ghostrun::domain::{
    ErrorDetail, ErrorKind, IntentKind, Mode, PartialResult, Priority, SubtaskStatus, TaskStatus, VerificationType,
};
use ghostrun::events::{QueueEventKind, SchedulerEventKind, StatusBus, StatusEvent, StatusPayload};
use ghostrun::monitor::BudgetMode;
use ghostrun::navigator::{ActionDecision, FixtureNavigator};
use ghostrun::orchestrator::{Orchestrator, Route, SubmissionRequest};
use ghostrun::pool::{PoolConfig, PoolManager, SessionFactory, StubSessionFactory};
use ghostrun::r#loop::{FinalState, LoopOutcome};
use ghostrun::scheduler::{AttemptContext, SchedulerConfig, TaskRunner, TaskScheduler};
use ghostrun::session::{SessionClient, SessionError, StubSessionClient};
use ghostrun::state::{TaskState, TaskStateMachine};

fn test_config() -> Config {
    let mut config = Config::default();
    config.pool.session_count = 6;
    config.pool.min_size = 1;
    config.execution.max_steps = 5;
    config
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

fn drain(rx: &mut tokio::sync::broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn scheduler_kinds(events: &[StatusEvent], task_id: &str) -> Vec<SchedulerEventKind> {
    events
        .iter()
        .filter(|e| e.task_id == task_id)
        .filter_map(|e| match &e.payload {
            StatusPayload::Scheduler(p) => Some(p.event),
            _ => None,
        })
        .collect()
}

// =============================================================================
// S1 - URL navigation (no decomposition)
// =============================================================================

#[tokio::test]
async fn test_s1_url_navigation_foreground_route() {
    let orchestrator = Orchestrator::start(
        test_config(),
        Arc::new(StubSessionFactory::new()),
        Arc::new(FixtureNavigator::new()),
    )
    .await;

    let result = orchestrator.submit(SubmissionRequest::new("google.com"));
    assert!(result.accepted);

    let dispatch = result.dispatch.unwrap();
    assert_eq!(dispatch.classification.intent, IntentKind::Navigate);
    assert!(dispatch.classification.confidence >= 0.95);
    assert_eq!(dispatch.execution_plan.route, Route::TopTabNavigate);
    assert!(dispatch.execution_plan.run_in_top_tab);
    assert_eq!(dispatch.normalized_url.as_deref(), Some("https://google.com/"));

    // No task spawned: the top tab handles foreground navigation
    assert!(dispatch.task_id.is_none());
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.queued + snapshot.running, 0);

    orchestrator.shutdown().await;
}

// =============================================================================
// S2 - Research task, single session
// =============================================================================

#[tokio::test]
async fn test_s2_research_task_decomposes_and_succeeds() {
    let orchestrator = Orchestrator::start(
        test_config(),
        Arc::new(StubSessionFactory::new()),
        Arc::new(FixtureNavigator::new()),
    )
    .await;
    let mut rx = orchestrator.on_status();

    let result = orchestrator.submit(SubmissionRequest::new(
        "Compare prices for AirPods Pro on Amazon and Best Buy",
    ));
    let dispatch = result.dispatch.unwrap();
    assert_eq!(dispatch.classification.intent, IntentKind::Research);
    assert!(dispatch.classification.confidence >= 0.85);

    let task_id = dispatch.task_id.unwrap();
    let task = orchestrator.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);

    let plan = task.plan.as_ref().unwrap();
    assert!(plan.is_decomposed());
    assert!(plan.len() >= 3);
    assert!(
        plan.subtasks
            .iter()
            .any(|s| s.verification_type == VerificationType::DataExtracted)
    );
    // First subtask (and only it) activated
    assert_eq!(plan.subtasks[0].status, SubtaskStatus::InProgress);
    assert!(plan.subtasks[1..].iter().all(|s| s.status == SubtaskStatus::Pending));

    wait_for_status(&orchestrator, &task_id, TaskStatus::Succeeded).await;

    // Per-task ordering: queue events first, one terminal scheduler event
    // last, no state events after it
    let events: Vec<StatusEvent> = drain(&mut rx).into_iter().filter(|e| e.task_id == task_id).collect();
    let first_kind = events.first().map(|e| e.payload.kind()).unwrap();
    assert_eq!(first_kind, "QUEUE");

    let terminal_index = events
        .iter()
        .position(|e| matches!(&e.payload, StatusPayload::Scheduler(p) if p.event.is_terminal()))
        .expect("terminal scheduler event");
    assert!(
        events[terminal_index + 1..]
            .iter()
            .all(|e| !matches!(e.payload, StatusPayload::State(_) | StatusPayload::Subtask(_))),
        "no state/subtask events after the terminal scheduler event"
    );

    orchestrator.shutdown().await;
}

// =============================================================================
// S3 - Mode override
// =============================================================================

#[tokio::test]
async fn test_s3_make_mode_override_refused_by_core() {
    let orchestrator = Orchestrator::start(
        test_config(),
        Arc::new(StubSessionFactory::new()),
        Arc::new(FixtureNavigator::new()),
    )
    .await;
    let mut rx = orchestrator.on_status();

    let result = orchestrator.submit(SubmissionRequest::new("google.com").with_mode(Mode::Make));
    let dispatch = result.dispatch.unwrap();

    assert_eq!(dispatch.classification.intent, IntentKind::Generate);
    assert_eq!(dispatch.classification.confidence, 1.0);
    assert_eq!(
        serde_json::to_value(&dispatch.classification.source).unwrap(),
        serde_json::json!("MODE_OVERRIDE")
    );
    assert_eq!(serde_json::to_value(&dispatch.execution_plan.route).unwrap(), serde_json::json!("MAKER_GENERATE"));

    let task_id = dispatch.task_id.unwrap();
    let task = orchestrator.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    // The task never ran: no session was ever assigned
    assert!(task.started_at.is_none());

    let events = drain(&mut rx);
    let kinds = scheduler_kinds(&events, &task_id);
    assert_eq!(kinds, vec![SchedulerEventKind::Failed]);

    orchestrator.shutdown().await;
}

// =============================================================================
// S4 - Crash recovery
// =============================================================================

/// Crashes the first attempt of any input containing "crashy"
struct CrashOnceRunner {
    crashed: AtomicBool,
}

#[async_trait]
impl TaskRunner for CrashOnceRunner {
    async fn run(&self, ctx: AttemptContext) -> Result<LoopOutcome, ErrorDetail> {
        if ctx.input.contains("crashy") && !self.crashed.swap(true, Ordering::SeqCst) {
            return Err(ErrorDetail::new(ErrorKind::Protocol, "renderer crashed").with_retryable(false));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(LoopOutcome {
            final_state: FinalState::Done,
            steps_taken: 2,
            final_url: Some("https://done.test/".to_string()),
            error: None,
            extracted: vec![],
            stats: Default::default(),
        })
    }
}

#[tokio::test]
async fn test_s4_crash_recovery_with_concurrent_task() {
    let pool = PoolManager::start(
        PoolConfig {
            min_size: 1,
            max_size: 6,
            warmup_timeout: Duration::from_secs(5),
        },
        Arc::new(StubSessionFactory::new()),
    )
    .await;
    let bus = StatusBus::new(4096);
    let mut rx = bus.subscribe();

    let scheduler = Arc::new(TaskScheduler::new(
        pool.clone(),
        SchedulerConfig::default(),
        Default::default(),
        Arc::new(CrashOnceRunner {
            crashed: AtomicBool::new(false),
        }),
    ));

    let scheduler_a = scheduler.clone();
    let emitter_a = bus.emitter_for("task-a");
    let a = tokio::spawn(async move { scheduler_a.submit("task-a", "crashy research", Priority::Background, emitter_a).await });

    let scheduler_b = scheduler.clone();
    let emitter_b = bus.emitter_for("task-b");
    let b = tokio::spawn(async move { scheduler_b.submit("task-b", "calm research", Priority::Background, emitter_b).await });

    let result_a = a.await.unwrap().expect("task A should recover");
    let result_b = b.await.unwrap().expect("task B should succeed");
    assert_eq!(result_a.attempts_used, 2);
    assert_eq!(result_b.attempts_used, 1);

    let events = drain(&mut rx);
    let kinds_a = scheduler_kinds(&events, "task-a");
    assert_eq!(
        kinds_a,
        vec![
            SchedulerEventKind::Started,
            SchedulerEventKind::CrashDetected,
            SchedulerEventKind::Retrying,
            SchedulerEventKind::Started,
            SchedulerEventKind::Succeeded,
        ]
    );
    let kinds_b = scheduler_kinds(&events, "task-b");
    assert_eq!(kinds_b, vec![SchedulerEventKind::Started, SchedulerEventKind::Succeeded]);

    // Replacement slot warmed; nothing leased at the end
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = pool.snapshot().await;
            if snapshot.in_use == 0 && snapshot.available >= snapshot.min_size {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pool should settle after crash recovery");
}

// =============================================================================
// S5 - Resource budget kill
// =============================================================================

#[tokio::test]
async fn test_s5_budget_kill_isolated_to_one_session() {
    // ghost-1 runs hot (2 GB heap); every other session stays small
    let factory = StubSessionFactory::with_configure(|stub| {
        if stub.context_id() == "ghost-1" {
            stub.set_heap_bytes(2 * 1024 * 1024 * 1024);
        } else {
            stub.set_heap_bytes(512 * 1024);
        }
    });
    let pool = PoolManager::start(
        PoolConfig {
            min_size: 1,
            max_size: 2,
            warmup_timeout: Duration::from_secs(5),
        },
        Arc::new(factory),
    )
    .await;
    let bus = StatusBus::new(4096);
    let mut rx = bus.subscribe();

    struct SlowRunner;
    #[async_trait]
    impl TaskRunner for SlowRunner {
        async fn run(&self, ctx: AttemptContext) -> Result<LoopOutcome, ErrorDetail> {
            // Outlive the violation window; a killed session shortens this
            for _ in 0..40 {
                if ctx.lease.client().sample_resource_metrics().await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Ok(LoopOutcome {
                final_state: FinalState::Done,
                steps_taken: 1,
                final_url: Some("https://done.test/".to_string()),
                error: None,
                extracted: vec![],
                stats: Default::default(),
            })
        }
    }

    let mut budgets = ghostrun::config::BudgetSettings::default();
    budgets.memory_mb = 1.0;
    budgets.sample_interval_ms = 50;
    budgets.violation_window_ms = 300;
    budgets.mode = BudgetMode::KillTab;

    let scheduler = Arc::new(TaskScheduler::new(pool, SchedulerConfig::default(), budgets, Arc::new(SlowRunner)));

    // Task A lands on ghost-1 (first available in order), task B on ghost-2
    let scheduler_a = scheduler.clone();
    let emitter_a = bus.emitter_for("task-a");
    let a = tokio::spawn(async move { scheduler_a.submit("task-a", "hot task", Priority::Background, emitter_a).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let scheduler_b = scheduler.clone();
    let emitter_b = bus.emitter_for("task-b");
    let b = tokio::spawn(async move { scheduler_b.submit("task-b", "calm task", Priority::Background, emitter_b).await });

    let result_a = a.await.unwrap();
    let result_b = b.await.unwrap();
    assert!(result_a.is_err(), "over-budget task must fail");
    assert!(result_b.is_ok(), "concurrent task on another session is unaffected");

    let events = drain(&mut rx);
    let kinds_a = scheduler_kinds(&events, "task-a");
    let exceeded = kinds_a.iter().position(|k| *k == SchedulerEventKind::ResourceBudgetExceeded);
    let killed = kinds_a.iter().position(|k| *k == SchedulerEventKind::ResourceBudgetKilled);
    assert!(exceeded.is_some(), "expected RESOURCE_BUDGET_EXCEEDED");
    assert!(killed.is_some(), "expected RESOURCE_BUDGET_KILLED");
    assert!(exceeded < killed, "EXCEEDED precedes KILLED");
    assert_eq!(kinds_a.last(), Some(&SchedulerEventKind::Failed));
    assert!(!kinds_a.contains(&SchedulerEventKind::Retrying), "budget kills are not retried");

    let kinds_b = scheduler_kinds(&events, "task-b");
    assert_eq!(kinds_b.last(), Some(&SchedulerEventKind::Succeeded));
}

// =============================================================================
// S6 - Cancellation freezes partial results
// =============================================================================

#[tokio::test]
async fn test_s6_cancellation_freezes_partial_result() {
    let navigator = Arc::new(FixtureNavigator::new());
    navigator.set_delay(Duration::from_millis(80));
    for _ in 0..50 {
        navigator.push(ActionDecision::wait(0.9, "waiting"));
    }
    let orchestrator =
        Orchestrator::start(test_config(), Arc::new(StubSessionFactory::new()), navigator.clone()).await;

    let result = orchestrator.submit(SubmissionRequest::new(
        "open news.test then extract the headlines and then summarize them",
    ));
    let task_id = result.task_id().unwrap().to_string();

    wait_for_status(&orchestrator, &task_id, TaskStatus::Running).await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    let mut rx = orchestrator.on_status();
    let cancelled_at = std::time::Instant::now();
    assert!(orchestrator.cancel(&task_id).await);

    // Terminal CANCELLED within a second, partial snapshot frozen
    let task = orchestrator.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    let partial: PartialResult = task.partial.unwrap();
    assert!(partial.current_url.is_some());
    assert!(partial.progress_label.is_some());

    // No further status events for this task
    tokio::time::sleep(Duration::from_millis(300)).await;
    let post_cancel: Vec<StatusEvent> = drain(&mut rx).into_iter().filter(|e| e.task_id == task_id).collect();
    assert!(post_cancel.is_empty(), "no events after cancellation");

    // Pool replenishes and subsequent submissions succeed
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if orchestrator.snapshot().await.pool.available >= 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pool should replenish");

    // Fresh submissions should succeed immediately on a healthy pool
    navigator.clear_script();
    navigator.clear_delay();
    let follow_up = orchestrator.submit(SubmissionRequest::new("compare x and y and z"));
    let follow_up_id = follow_up.task_id().unwrap().to_string();
    wait_for_status(&orchestrator, &follow_up_id, TaskStatus::Succeeded).await;

    orchestrator.shutdown().await;
}

// =============================================================================
// Lease conservation and priority discipline under load
// =============================================================================

#[tokio::test]
async fn test_lease_conservation_under_concurrent_load() {
    let pool = PoolManager::start(
        PoolConfig {
            min_size: 1,
            max_size: 3,
            warmup_timeout: Duration::from_secs(5),
        },
        Arc::new(StubSessionFactory::new()),
    )
    .await;
    let bus = StatusBus::new(8192);

    let mut handles = Vec::new();
    for i in 0..20 {
        let pool = pool.clone();
        let task_id = format!("task-{}", i);
        let emitter = bus.emitter_for(&task_id);
        let priority = if i % 4 == 0 { Priority::Foreground } else { Priority::Background };
        handles.push(tokio::spawn(async move {
            let lease = pool.acquire(&task_id, priority, emitter).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            lease.release().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = pool.snapshot().await;
    assert_eq!(snapshot.stats.total_acquired, 20);
    assert_eq!(snapshot.stats.total_released, 20);
    assert_eq!(snapshot.in_use, 0);
    assert!(snapshot.stats.peak_in_use <= 3, "in_use never exceeds max_size");
}

#[tokio::test]
async fn test_priority_discipline_in_queue() {
    let pool = PoolManager::start(
        PoolConfig {
            min_size: 1,
            max_size: 1,
            warmup_timeout: Duration::from_secs(5),
        },
        Arc::new(StubSessionFactory::new()),
    )
    .await;
    let bus = StatusBus::new(8192);

    let holder = pool
        .acquire("holder", Priority::Background, bus.emitter_for("holder"))
        .await
        .unwrap();

    // Queue background first, then foreground; record grant order
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for (task_id, priority) in [
        ("bg-early", Priority::Background),
        ("bg-late", Priority::Background),
        ("fg-last", Priority::Foreground),
    ] {
        let pool = pool.clone();
        let emitter = bus.emitter_for(task_id);
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            let lease = pool.acquire(task_id, priority, emitter).await.unwrap();
            order.lock().unwrap().push(task_id.to_string());
            lease.release().await;
        }));
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    holder.release().await;
    for handle in handles {
        handle.await.unwrap();
    }

    let order = order.lock().unwrap().clone();
    // Foreground queued last but assigned first; background keeps FIFO
    assert_eq!(order, vec!["fg-last", "bg-early", "bg-late"]);
}

// =============================================================================
// Cache invalidation across navigation (loop-level invariant)
// =============================================================================

#[tokio::test]
async fn test_cache_invalidation_after_navigation() {
    use ghostrun::r#loop::{LoopConfig, PerceptionActionLoop};
    use ghostrun::session::ActionOutcome;

    let stub = Arc::new(StubSessionClient::new("ghost-1"));
    let fixture = Arc::new(FixtureNavigator::new());

    // Step 1 clicks and navigates to a new document; step 2 must refetch
    // and re-infer rather than reuse anything cached
    fixture.push(ActionDecision::click(20.0, 40.0, 0.9, "go to page two"));
    let mut nav_outcome = ActionOutcome::quiet("https://two.test/");
    nav_outcome.navigation_observed = true;
    stub.push_outcome(nav_outcome);
    fixture.push(ActionDecision::done(0.95, "finished on page two"));

    let mut engine = PerceptionActionLoop::detached(stub, fixture.clone(), LoopConfig::default().with_max_steps(5));
    let outcome = engine
        .run("walk two pages", Some("https://one.test/"), Default::default())
        .await;

    assert_eq!(outcome.final_state, FinalState::Done);
    assert_eq!(outcome.stats.cache_hits, 0, "navigation invalidates the decision cache");
    // Both steps called the navigator
    assert_eq!(fixture.call_count(), 2);
    // The second observation came from the new url
    assert_eq!(fixture.requests()[1].2, "https://two.test/");
}

// =============================================================================
// Status boundary validation at the stream edge
// =============================================================================

#[tokio::test]
async fn test_status_events_validate_at_boundary() {
    let orchestrator = Orchestrator::start(
        test_config(),
        Arc::new(StubSessionFactory::new()),
        Arc::new(FixtureNavigator::new()),
    )
    .await;
    let mut rx = orchestrator.on_status();

    let result = orchestrator.submit(SubmissionRequest::new("compare one and two and three"));
    let task_id = result.task_id().unwrap().to_string();
    wait_for_status(&orchestrator, &task_id, TaskStatus::Succeeded).await;

    // Every event on the stream round-trips through boundary validation
    for event in drain(&mut rx) {
        let json = serde_json::to_value(&event).unwrap();
        let validated = ghostrun::events::validate_envelope(&json).expect("stream events must validate");
        assert_eq!(validated, event);
    }

    orchestrator.shutdown().await;
}

// =============================================================================
// Session factory isolation
// =============================================================================

#[tokio::test]
async fn test_replenished_slot_gets_fresh_partition() {
    struct PartitionRecorder(std::sync::Mutex<Vec<(String, String)>>);

    #[async_trait]
    impl SessionFactory for PartitionRecorder {
        async fn create(&self, context_id: &str, partition_id: &str) -> Result<Arc<dyn SessionClient>, SessionError> {
            self.0
                .lock()
                .unwrap()
                .push((context_id.to_string(), partition_id.to_string()));
            Ok(Arc::new(StubSessionClient::new(context_id)))
        }
    }

    let factory = Arc::new(PartitionRecorder(std::sync::Mutex::new(Vec::new())));
    let pool = PoolManager::start(
        PoolConfig {
            min_size: 1,
            max_size: 1,
            warmup_timeout: Duration::from_secs(5),
        },
        factory.clone(),
    )
    .await;
    let bus = StatusBus::new(256);

    let lease = pool
        .acquire("task-1", Priority::Background, bus.emitter_for("task-1"))
        .await
        .unwrap();
    lease.destroy().await;

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if pool.snapshot().await.available == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("replacement should warm");

    let created = factory.0.lock().unwrap().clone();
    assert_eq!(created.len(), 2);
    // Same context id, different storage partition
    assert_eq!(created[0].0, created[1].0);
    assert_ne!(created[0].1, created[1].1, "replacement must not reuse the partition");
}

// =============================================================================
// Property tests
// =============================================================================

mod properties {
    use super::*;
    use ghostrun::planning::{Decomposer, PlannerConfig, classify_intent};
    use proptest::prelude::*;

    fn arbitrary_state() -> impl Strategy<Value = TaskState> {
        prop_oneof![
            Just(TaskState::Idle),
            Just(TaskState::Loading),
            Just(TaskState::Perceiving),
            Just(TaskState::Inferring),
            Just(TaskState::Acting),
            Just(TaskState::Complete),
            Just(TaskState::Failed),
        ]
    }

    proptest! {
        /// Every accepted transition is a row of the legality table, and
        /// rejected requests leave the state unchanged.
        #[test]
        fn state_machine_legality(requests in proptest::collection::vec(arbitrary_state(), 1..64)) {
            let mut machine = TaskStateMachine::new();
            let mut accepted = Vec::new();

            for (i, to) in requests.into_iter().enumerate() {
                let before = machine.current();
                match machine.transition(to, i as u32, None, "prop") {
                    Ok(payload) => {
                        prop_assert_eq!(payload.from, before);
                        prop_assert_eq!(payload.to, to);
                        accepted.push((before, to));
                    }
                    Err(_) => prop_assert_eq!(machine.current(), before),
                }
            }

            // Replay: the accepted pairs form a path through the table
            for (from, to) in accepted {
                prop_assert!(from.can_transition_to(to), "illegal accepted pair {} -> {}", from, to);
            }
        }

        /// The plan preserves the intent verbatim and activates only the
        /// first subtask.
        #[test]
        fn decomposition_roundtrip(intent in "[a-zA-Z0-9 .,]{1,120}") {
            prop_assume!(!intent.trim().is_empty());
            let classification = classify_intent(&intent, Mode::Auto);
            let mut plan = Decomposer::new(PlannerConfig::default()).decompose(&intent, &classification);

            prop_assert_eq!(&plan.intent, &intent);
            prop_assert!(!plan.is_empty());
            prop_assert!(ghostrun::domain::find_dependency_cycle(&plan.subtasks).is_none());

            plan.activate();
            let in_progress = plan.subtasks.iter().filter(|s| s.status == SubtaskStatus::InProgress).count();
            prop_assert_eq!(in_progress, 1);
            prop_assert_eq!(plan.subtasks[0].status, SubtaskStatus::InProgress);
        }

        /// is_decomposed tracks the implied step count threshold.
        #[test]
        fn decomposition_threshold(intent in "[a-z ]{1,80}") {
            prop_assume!(!intent.trim().is_empty());
            let classification = classify_intent(&intent, Mode::Auto);
            let decomposer = Decomposer::new(PlannerConfig::default());
            let plan = decomposer.decompose(&intent, &classification);
            prop_assert_eq!(plan.is_decomposed(), plan.implied_steps >= 3);
        }

        /// Mode overrides always win with full confidence.
        #[test]
        fn mode_override_precedence(intent in ".{1,60}") {
            for (mode, expected) in [
                (Mode::Browse, IntentKind::Navigate),
                (Mode::Do, IntentKind::Transact),
                (Mode::Make, IntentKind::Generate),
                (Mode::Research, IntentKind::Research),
            ] {
                let classification = classify_intent(&intent, mode);
                prop_assert_eq!(classification.intent, expected);
                prop_assert_eq!(classification.confidence, 1.0);
            }
        }

        /// Malformed payload kinds never pass boundary validation.
        #[test]
        fn boundary_rejects_unknown_kinds(kind in "[A-Z]{3,12}") {
            prop_assume!(!matches!(kind.as_str(), "QUEUE" | "STATE" | "SCHEDULER" | "SUBTASK"));
            let json = serde_json::json!({
                "schema": 1,
                "task_id": "task-1",
                "context_id": null,
                "payload": { "kind": kind }
            });
            prop_assert!(ghostrun::events::validate_envelope(&json).is_err());
        }
    }
}

// =============================================================================
// Queue event stream shape
// =============================================================================

#[tokio::test]
async fn test_queue_event_stream_per_request() {
    let pool = PoolManager::start(
        PoolConfig {
            min_size: 1,
            max_size: 1,
            warmup_timeout: Duration::from_secs(5),
        },
        Arc::new(StubSessionFactory::new()),
    )
    .await;
    let bus = StatusBus::new(1024);
    let mut rx = bus.subscribe();

    let first = pool
        .acquire("first", Priority::Background, bus.emitter_for("first"))
        .await
        .unwrap();

    let pool2 = pool.clone();
    let emitter = bus.emitter_for("second");
    let second = tokio::spawn(async move { pool2.acquire("second", Priority::Background, emitter).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    first.release().await;
    let second_lease = second.await.unwrap().unwrap();
    assert!(second_lease.was_queued());
    assert!(second_lease.assignment_wait_ms() > 0);
    second_lease.release().await;

    let events = drain(&mut rx);
    let second_queue: Vec<(QueueEventKind, bool)> = events
        .iter()
        .filter(|e| e.task_id == "second")
        .filter_map(|e| match &e.payload {
            StatusPayload::Queue(p) => Some((p.event, p.was_queued)),
            _ => None,
        })
        .collect();
    assert_eq!(
        second_queue,
        vec![
            (QueueEventKind::Enqueued, false),
            (QueueEventKind::Dispatched, true),
            (QueueEventKind::Released, true),
        ]
    );
}
