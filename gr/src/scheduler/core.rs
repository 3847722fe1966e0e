//! Scheduler implementation
//!
//! The attempt loop: acquire a fresh lease, start the budget monitor, run
//! the task runner, then judge the attempt against crash and violation
//! signals. Only crashes retry; budget kills and ordinary failures
//! short-circuit to FAILED.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BudgetSettings;
use crate::domain::{ErrorDetail, ErrorKind, PartialResult, Priority};
use crate::events::{SchedulerEventKind, SchedulerPayload, StatusEmitter};
use crate::monitor::ResourceBudgetMonitor;
use crate::pool::{Lease, PoolError, PoolManager, PoolSnapshot};
use crate::r#loop::LoopOutcome;

use super::config::SchedulerConfig;

/// Everything a runner needs for one attempt
pub struct AttemptContext {
    pub lease: Arc<Lease>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub input: String,
    pub emitter: StatusEmitter,
    /// Live partial-result snapshot, frozen on cancellation
    pub progress: Arc<Mutex<PartialResult>>,
    /// Retries the runner has charged against this task's budget
    ///
    /// Shared across attempts. A fallback-plan activation increments it
    /// when the planner is configured to count fallbacks as retries;
    /// each charged retry removes one crash retry from the budget.
    pub extra_retries_consumed: Arc<AtomicU32>,
}

/// Executes one attempt of a task over a leased session
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, ctx: AttemptContext) -> Result<LoopOutcome, ErrorDetail>;
}

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task execution failed: {detail}")]
    Execution { detail: ErrorDetail },

    #[error("task was cancelled")]
    Cancelled,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("unknown task: {0}")]
    UnknownTask(String),
}

/// Successful run summary
#[derive(Debug, Clone)]
pub struct RunResult {
    pub task_id: String,
    pub attempts_used: u32,
    pub outcome: LoopOutcome,
}

/// Crash-like text in a runner failure message
pub fn is_crash_message(message: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b((target|page|session) (has been )?closed|renderer crash(ed)?|browser (has )?disconnected)\b")
            .unwrap()
    });
    pattern.is_match(message)
}

struct TaskControl {
    cancelled: bool,
    terminal: bool,
    context_id: Option<String>,
    progress: Arc<Mutex<PartialResult>>,
    emitter: StatusEmitter,
}

/// Runs submitted tasks over the ghost pool
pub struct TaskScheduler {
    pool: Arc<PoolManager>,
    config: SchedulerConfig,
    budgets: BudgetSettings,
    runner: Arc<dyn TaskRunner>,
    tasks: Mutex<HashMap<String, TaskControl>>,
}

impl TaskScheduler {
    pub fn new(
        pool: Arc<PoolManager>,
        config: SchedulerConfig,
        budgets: BudgetSettings,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            pool,
            config,
            budgets,
            runner,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Pool observability passthrough
    pub async fn pool_snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot().await
    }

    /// The frozen partial-result snapshot for a task, if registered
    pub fn progress_for(&self, task_id: &str) -> Option<PartialResult> {
        self.tasks
            .lock()
            .expect("tasks lock poisoned")
            .get(task_id)
            .map(|c| c.progress.lock().expect("progress lock poisoned").clone())
    }

    fn is_cancelled(&self, task_id: &str) -> bool {
        self.tasks
            .lock()
            .expect("tasks lock poisoned")
            .get(task_id)
            .map(|c| c.cancelled)
            .unwrap_or(false)
    }

    fn mark_terminal(&self, task_id: &str) {
        if let Some(control) = self.tasks.lock().expect("tasks lock poisoned").get_mut(task_id) {
            control.terminal = true;
        }
    }

    /// Run a task through up to `max_attempts` attempts
    pub async fn submit(
        &self,
        task_id: &str,
        input: &str,
        priority: Priority,
        emitter: StatusEmitter,
    ) -> Result<RunResult, SchedulerError> {
        let progress = Arc::new(Mutex::new(PartialResult::default()));
        let extra_retries_consumed = Arc::new(AtomicU32::new(0));
        {
            let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
            tasks.insert(
                task_id.to_string(),
                TaskControl {
                    cancelled: false,
                    terminal: false,
                    context_id: None,
                    progress: progress.clone(),
                    emitter: emitter.clone(),
                },
            );
        }

        let max_attempts = self.config.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if self.is_cancelled(task_id) {
                return Err(SchedulerError::Cancelled);
            }

            let lease = match self.pool.acquire(task_id, priority, emitter.clone()).await {
                Ok(lease) => Arc::new(lease),
                Err(PoolError::AcquireCancelled) if self.is_cancelled(task_id) => {
                    return Err(SchedulerError::Cancelled);
                }
                Err(e) => return Err(e.into()),
            };

            // Deferred-destroy path: cancellation arrived while queued and
            // the context id only became visible now
            let cancelled_while_queued = {
                let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
                match tasks.get_mut(task_id) {
                    Some(control) => {
                        control.context_id = Some(lease.context_id().to_string());
                        control.cancelled
                    }
                    None => false,
                }
            };
            if cancelled_while_queued {
                debug!(task_id, context_id = lease.context_id(), "deferred destroy after cancel");
                self.pool.destroy_context(lease.context_id()).await;
                lease.release_quiet().await;
                return Err(SchedulerError::Cancelled);
            }

            emitter.scheduler(SchedulerPayload {
                event: SchedulerEventKind::Started,
                priority,
                context_id: Some(lease.context_id().to_string()),
                assignment_wait_ms: lease.assignment_wait_ms(),
                duration_ms: 0,
                error: None,
            });
            info!(task_id, attempt, max_attempts, context_id = lease.context_id(), "attempt started");

            let started = Instant::now();
            let monitor = ResourceBudgetMonitor::start(lease.client(), self.budgets.clone(), emitter.clone(), priority);

            let ctx = AttemptContext {
                lease: lease.clone(),
                attempt,
                max_attempts,
                input: input.to_string(),
                emitter: emitter.clone(),
                progress: progress.clone(),
                extra_retries_consumed: extra_retries_consumed.clone(),
            };
            let result = self.runner.run(ctx).await;

            let violation = monitor.stop().await;
            let crash = lease.crash_observed();
            let duration_ms = started.elapsed().as_millis() as u64;

            let failure_message = match &result {
                Ok(outcome) => outcome.error.as_ref().map(|e| e.message.clone()),
                Err(detail) => Some(detail.message.clone()),
            };
            let crash_like = crash || failure_message.as_deref().is_some_and(is_crash_message);
            let kill_triggered = violation.as_ref().is_some_and(|v| v.kill_triggered);

            // Cancellation suppresses all further events for the task;
            // otherwise a dead session must not return to the available set
            if self.is_cancelled(task_id) {
                lease.release_quiet().await;
            } else if crash_like || kill_triggered {
                lease.destroy().await;
            } else {
                lease.release().await;
            }

            if self.is_cancelled(task_id) {
                debug!(task_id, "attempt ended after cancellation, suppressing result");
                return Err(SchedulerError::Cancelled);
            }

            let succeeded = result.as_ref().map(|o| o.succeeded()).unwrap_or(false);
            if succeeded && violation.is_none() && !crash {
                self.mark_terminal(task_id);
                emitter.scheduler(SchedulerPayload {
                    event: SchedulerEventKind::Succeeded,
                    priority,
                    context_id: Some(lease.context_id().to_string()),
                    assignment_wait_ms: lease.assignment_wait_ms(),
                    duration_ms,
                    error: None,
                });
                info!(task_id, attempt, "task succeeded");
                return Ok(RunResult {
                    task_id: task_id.to_string(),
                    attempts_used: attempt,
                    outcome: result.expect("succeeded implies outcome"),
                });
            }

            // Build the failure detail for this attempt
            let detail = if let Some(v) = &violation {
                ErrorDetail::new(
                    ErrorKind::Runtime,
                    format!(
                        "resource budget violated: {:?} {:.1} over budget {:.1}",
                        v.resource, v.observed, v.budget
                    ),
                )
                .with_retryable(false)
            } else {
                match &result {
                    Ok(outcome) => outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| ErrorDetail::new(ErrorKind::Unknown, "attempt did not succeed")),
                    Err(detail) => detail.clone(),
                }
            };

            if crash_like {
                emitter.scheduler(SchedulerPayload {
                    event: SchedulerEventKind::CrashDetected,
                    priority,
                    context_id: Some(lease.context_id().to_string()),
                    assignment_wait_ms: lease.assignment_wait_ms(),
                    duration_ms,
                    error: Some(detail.clone()),
                });
                warn!(task_id, attempt, "session crash detected");
            }
            if kill_triggered {
                emitter.scheduler(SchedulerPayload {
                    event: SchedulerEventKind::ResourceBudgetKilled,
                    priority,
                    context_id: Some(lease.context_id().to_string()),
                    assignment_wait_ms: lease.assignment_wait_ms(),
                    duration_ms,
                    error: Some(detail.clone()),
                });
            }

            // Only crashes retry; budget violations never do. Retries
            // the runner already charged (fallback activations) shrink
            // the remaining budget.
            let charged = extra_retries_consumed.load(Ordering::SeqCst);
            if crash_like && violation.is_none() && attempt + charged < max_attempts {
                emitter.scheduler(SchedulerPayload {
                    event: SchedulerEventKind::Retrying,
                    priority,
                    context_id: Some(lease.context_id().to_string()),
                    assignment_wait_ms: lease.assignment_wait_ms(),
                    duration_ms,
                    error: None,
                });
                info!(task_id, attempt, "retrying after crash");
                continue;
            }

            self.mark_terminal(task_id);
            emitter.scheduler(SchedulerPayload {
                event: SchedulerEventKind::Failed,
                priority,
                context_id: Some(lease.context_id().to_string()),
                assignment_wait_ms: lease.assignment_wait_ms(),
                duration_ms,
                error: Some(detail.clone()),
            });
            info!(task_id, attempt, error = %detail, "task failed");
            return Err(SchedulerError::Execution { detail });
        }
    }

    /// Cancel a task: non-cooperative session destruction
    ///
    /// Idempotent; returns false for unknown or already-terminal tasks.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let (context_id, emitter) = {
            let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
            let Some(control) = tasks.get_mut(task_id) else {
                return false;
            };
            if control.terminal {
                return false;
            }
            if control.cancelled {
                return true;
            }
            control.cancelled = true;
            (control.context_id.clone(), control.emitter.clone())
        };

        match context_id {
            Some(context_id) => {
                info!(task_id, %context_id, "cancelling: destroying assigned session");
                // Nothing downstream may emit after the terminal status
                emitter.mute();
                self.pool.destroy_context(&context_id).await;
            }
            None => {
                info!(task_id, "cancelling: removing queued acquire");
                // The queue RELEASED event for the removed waiter is part
                // of the contract; mute only after it is out.
                self.pool.cancel_waiting(task_id).await;
                emitter.mute();
                // If a slot was assigned concurrently, the submit loop's
                // deferred-destroy check tears it down on observation.
            }
        }
        true
    }
}
