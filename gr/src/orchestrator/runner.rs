//! Ghost task runner: drives a plan's subtasks through perception-action
//! loops over one leased session
//!
//! Plan state lives in a shared map so crash-retry attempts resume from
//! the last completed subtask instead of starting over.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::NetworkSettings;
use crate::domain::{DecompositionPlan, ErrorDetail, ErrorKind, PerceptionHint, SubtaskStatus};
use crate::events::{StatusEmitter, SubtaskPayload};
use crate::navigator::Navigator;
use crate::planning::PlannerConfig;
use crate::r#loop::{FinalState, LoopConfig, LoopOutcome, PerceptionActionLoop};
use crate::scheduler::{AttemptContext, TaskRunner, is_crash_message};

/// Reason attached to subtasks that cannot be dispatched autonomously
pub const HUMAN_REVIEW_REQUIRED: &str = "HUMAN_REVIEW_REQUIRED";

/// Runs one task's plan inside a leased ghost session
pub struct GhostTaskRunner {
    navigator: Arc<dyn Navigator>,
    loop_config: LoopConfig,
    network: NetworkSettings,
    planner: PlannerConfig,
    plans: Arc<Mutex<HashMap<String, DecompositionPlan>>>,
}

impl GhostTaskRunner {
    pub fn new(
        navigator: Arc<dyn Navigator>,
        loop_config: LoopConfig,
        network: NetworkSettings,
        planner: PlannerConfig,
    ) -> Self {
        Self {
            navigator,
            loop_config,
            network,
            planner,
            plans: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a task's plan before submission
    pub fn register_plan(&self, task_id: &str, plan: DecompositionPlan) {
        self.plans.lock().expect("plans lock poisoned").insert(task_id.to_string(), plan);
    }

    /// Current plan state for a task
    pub fn plan_for(&self, task_id: &str) -> Option<DecompositionPlan> {
        self.plans.lock().expect("plans lock poisoned").get(task_id).cloned()
    }

    /// Drop a finished task's plan
    pub fn remove_plan(&self, task_id: &str) {
        self.plans.lock().expect("plans lock poisoned").remove(task_id);
    }

    fn persist_plan(&self, task_id: &str, plan: &DecompositionPlan) {
        self.plans
            .lock()
            .expect("plans lock poisoned")
            .insert(task_id.to_string(), plan.clone());
    }

    fn emit_subtask(
        emitter: &StatusEmitter,
        plan: &DecompositionPlan,
        index: usize,
        attempt: u32,
        reason: Option<String>,
    ) {
        let subtask = &plan.subtasks[index];
        emitter.subtask(SubtaskPayload {
            subtask_id: subtask.id.clone(),
            subtask_intent: subtask.intent.clone(),
            status: subtask.status,
            verification_type: subtask.verification_type,
            verification_condition: subtask.verification_condition.clone(),
            current_subtask_index: index,
            total_subtasks: plan.len(),
            attempt,
            checkpoint_last_completed_subtask_index: plan.last_completed_index(),
            reason,
        });
    }

    fn merge(total: &mut LoopOutcome, outcome: LoopOutcome) {
        total.steps_taken += outcome.steps_taken;
        total.final_url = outcome.final_url;
        total.error = outcome.error;
        total.final_state = outcome.final_state;
        total.extracted.extend(outcome.extracted);
        total.stats.tier2_escalations += outcome.stats.tier2_escalations;
        total.stats.dom_bypasses += outcome.stats.dom_bypasses;
        total.stats.scroll_retries += outcome.stats.scroll_retries;
        total.stats.cache_hits += outcome.stats.cache_hits;
        total.stats.cache_misses += outcome.stats.cache_misses;
        total.stats.duration_ms += outcome.stats.duration_ms;
    }
}

#[async_trait]
impl TaskRunner for GhostTaskRunner {
    async fn run(&self, ctx: AttemptContext) -> Result<LoopOutcome, ErrorDetail> {
        let task_id = ctx.emitter.task_id().to_string();
        let client = ctx.lease.client();

        // Apply the configured interception posture at lease time
        if self.network.interception_enabled {
            let _ = client.set_interception_mode(self.network.interception_mode).await;
        }

        let Some(mut plan) = self.plan_for(&task_id) else {
            // No plan registered: run the raw input as a single loop
            let mut engine =
                PerceptionActionLoop::new(client, self.navigator.clone(), self.loop_config.clone(), ctx.emitter.clone());
            engine.set_progress_sink(ctx.progress.clone());
            return Ok(engine.run(&ctx.input, None, PerceptionHint::Unknown).await);
        };

        let mut total = LoopOutcome {
            final_state: FinalState::Done,
            steps_taken: 0,
            final_url: None,
            error: None,
            extracted: Vec::new(),
            stats: Default::default(),
        };

        while let Some(index) = plan.current_index() {
            let subtask = plan.subtasks[index].clone();

            if subtask.requires_human_review() {
                plan.subtasks[index].status = SubtaskStatus::Failed;
                Self::emit_subtask(&ctx.emitter, &plan, index, ctx.attempt, Some(HUMAN_REVIEW_REQUIRED.to_string()));
                self.persist_plan(&task_id, &plan);
                info!(task_id, subtask_id = %subtask.id, "subtask requires human review, refusing dispatch");
                return Err(ErrorDetail::new(
                    ErrorKind::Validation,
                    format!("human review required for subtask '{}'", subtask.id),
                ));
            }

            plan.subtasks[index].status = SubtaskStatus::InProgress;
            Self::emit_subtask(&ctx.emitter, &plan, index, ctx.attempt, None);
            debug!(task_id, subtask_id = %subtask.id, index, "subtask starting");

            let mut engine = PerceptionActionLoop::new(
                client.clone(),
                self.navigator.clone(),
                self.loop_config.clone(),
                ctx.emitter.clone(),
            );
            engine.set_progress_sink(ctx.progress.clone());
            let outcome = engine
                .run(&subtask.intent, subtask.start_url.as_deref(), subtask.perception_hint)
                .await;

            if outcome.succeeded() {
                plan.subtasks[index].status = SubtaskStatus::Complete;
                Self::emit_subtask(&ctx.emitter, &plan, index, ctx.attempt, None);
                self.persist_plan(&task_id, &plan);
                Self::merge(&mut total, outcome);
                continue;
            }

            // A crashed session leaves the subtask in progress so the
            // next attempt resumes here after the scheduler's retry
            let crashed = outcome
                .error
                .as_ref()
                .is_some_and(|e| is_crash_message(&e.message));
            if crashed {
                plan.subtasks[index].status = SubtaskStatus::InProgress;
                self.persist_plan(&task_id, &plan);
                Self::merge(&mut total, outcome);
                return Ok(total);
            }

            let reason = outcome.error.as_ref().map(|e| e.message.clone());
            plan.subtasks[index].status = SubtaskStatus::Failed;
            Self::emit_subtask(&ctx.emitter, &plan, index, ctx.attempt, reason);

            // Fallback first, then give up
            if plan.switch_to_fallback() {
                info!(task_id, "primary plan failed, switching to fallback");
                if self.planner.fallback_counts_against_retries {
                    ctx.extra_retries_consumed.fetch_add(1, Ordering::SeqCst);
                }
                self.persist_plan(&task_id, &plan);
                Self::merge(&mut total, outcome);
                total.final_state = FinalState::Done;
                total.error = None;
                continue;
            }

            self.persist_plan(&task_id, &plan);
            Self::merge(&mut total, outcome);
            return Ok(total);
        }

        self.persist_plan(&task_id, &plan);
        Ok(total)
    }
}
