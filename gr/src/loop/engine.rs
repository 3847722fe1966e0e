//! Perception-action loop engine
//!
//! One engine drives one task inside one leased session. Each step walks
//! loading -> perceiving -> inferring -> acting through the task state
//! machine; retryable step failures are absorbed by re-entering the
//! current phase (or perception, after a failed action) while consuming a
//! step, so the hard cap bounds every path.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{ErrorDetail, ErrorKind, PartialResult, PerceptionHint};
use crate::events::StatusEmitter;
use crate::navigator::{
    ActionDecision, ActionKind, DecideRequest, DecisionCache, EscalationReason, Navigator, NavigatorError, Tier,
};
use crate::session::{ActionStatus, Observation, SessionClient, StructuredTreeCapture};
use crate::state::{TaskState, TaskStateMachine};

use super::config::LoopConfig;
use super::escalation::{dom_bypass, evaluate_escalation};
use super::perception::{PageAssessment, PerceptionCache, ProgressTracker};

/// Terminal loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    /// Navigator declared the task done
    Done,
    /// Terminal failure (navigator FAILED, non-retryable error, human
    /// escalation)
    Failed,
    /// Hard step cap reached without a terminal decision
    MaxSteps,
}

/// Loop execution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub tier2_escalations: u32,
    pub dom_bypasses: u32,
    pub scroll_retries: u32,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub duration_ms: u64,
}

/// Terminal outcome of one loop run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub final_state: FinalState,
    pub steps_taken: u32,
    pub final_url: Option<String>,
    pub error: Option<ErrorDetail>,
    pub extracted: Vec<serde_json::Value>,
    pub stats: LoopStats,
}

impl LoopOutcome {
    pub fn succeeded(&self) -> bool {
        self.final_state == FinalState::Done
    }
}

/// Per-session driver composing SessionClient, Navigator, and the task
/// state machine
pub struct PerceptionActionLoop {
    client: Arc<dyn SessionClient>,
    navigator: Arc<dyn Navigator>,
    config: LoopConfig,
    machine: TaskStateMachine,
    cache: DecisionCache,
    progress: Arc<Mutex<PartialResult>>,
}

impl PerceptionActionLoop {
    /// Engine emitting STATE events through the given emitter
    pub fn new(
        client: Arc<dyn SessionClient>,
        navigator: Arc<dyn Navigator>,
        config: LoopConfig,
        emitter: StatusEmitter,
    ) -> Self {
        let cache = DecisionCache::new(config.decision_cache_ttl);
        Self {
            client,
            navigator,
            config,
            machine: TaskStateMachine::with_emitter(emitter),
            cache,
            progress: Arc::new(Mutex::new(PartialResult::default())),
        }
    }

    /// Engine without event emission (unit tests)
    pub fn detached(client: Arc<dyn SessionClient>, navigator: Arc<dyn Navigator>, config: LoopConfig) -> Self {
        let cache = DecisionCache::new(config.decision_cache_ttl);
        Self {
            client,
            navigator,
            config,
            machine: TaskStateMachine::new(),
            cache,
            progress: Arc::new(Mutex::new(PartialResult::default())),
        }
    }

    /// Live partial-result snapshot, frozen by the scheduler on cancel
    pub fn progress_handle(&self) -> Arc<Mutex<PartialResult>> {
        self.progress.clone()
    }

    /// Write progress into an externally owned snapshot (the scheduler's)
    pub fn set_progress_sink(&mut self, sink: Arc<Mutex<PartialResult>>) {
        self.progress = sink;
    }

    /// Drive the task to a terminal outcome
    pub async fn run(&mut self, intent: &str, start_url: Option<&str>, hint: PerceptionHint) -> LoopOutcome {
        let started = Instant::now();
        let mut perception = PerceptionCache::new();
        let mut progress_tracker = ProgressTracker::new();
        let mut history: Vec<String> = Vec::new();
        let mut previous_actions: Vec<String> = Vec::new();
        let mut extracted: Vec<serde_json::Value> = Vec::new();
        let mut stats = LoopStats::default();
        let mut error_context: Option<ErrorDetail> = None;
        let mut current_url = self.client.current_url().await;
        let mut capture_for_step: Option<StructuredTreeCapture> = None;
        let mut pending_decision: Option<ActionDecision> = None;
        let mut step: u32 = 1;

        info!(intent, ?start_url, max_steps = self.config.max_steps, "perception-action loop starting");

        loop {
            if step > self.config.max_steps {
                return self.finish(
                    FinalState::MaxSteps,
                    self.config.max_steps,
                    current_url,
                    Some(ErrorDetail::new(
                        ErrorKind::Unknown,
                        format!("step cap ({}) reached without a terminal decision", self.config.max_steps),
                    )),
                    "max_steps",
                    started,
                    stats,
                    extracted,
                );
            }

            match self.machine.current() {
                TaskState::Idle => {
                    if self
                        .machine
                        .transition(TaskState::Loading, step, Some(current_url.clone()), "task start")
                        .is_err()
                    {
                        unreachable!("idle always admits loading");
                    }
                }

                TaskState::Loading => {
                    if let Some(url) = start_url
                        && current_url != url
                    {
                        match self.client.navigate(url, self.config.navigation_timeout).await {
                            Ok(outcome) => {
                                current_url = outcome.final_url;
                                self.cache.clear();
                            }
                            Err(e) => {
                                let detail = e.to_detail().with_step(step).with_url(url);
                                if detail.retryable && step < self.config.max_steps {
                                    warn!(step, error = %detail, "navigation failed, retrying");
                                    error_context = Some(detail);
                                    step += 1;
                                    continue;
                                }
                                return self.fail(step, current_url, detail, started, stats, extracted);
                            }
                        }
                    }
                    self.update_progress(&current_url, None, intent, started);
                    let _ = self
                        .machine
                        .transition(TaskState::Perceiving, step, Some(current_url.clone()), "page loaded");
                }

                TaskState::Perceiving => {
                    let capture = match perception.reuse(&current_url) {
                        Some(cached) => cached.clone(),
                        None => match self.client.capture_structured_tree(&self.config.tree_options).await {
                            Ok(fresh) => {
                                perception.store(fresh.clone());
                                fresh
                            }
                            Err(e) => {
                                let detail = e.to_detail().with_step(step).with_url(&current_url);
                                if detail.retryable && step < self.config.max_steps {
                                    warn!(step, error = %detail, "perception failed, retrying");
                                    error_context = Some(detail);
                                    step += 1;
                                    continue;
                                }
                                return self.fail(step, current_url, detail, started, stats, extracted);
                            }
                        },
                    };
                    capture_for_step = Some(capture);
                    let _ = self
                        .machine
                        .transition(TaskState::Inferring, step, Some(current_url.clone()), "observation ready");
                }

                TaskState::Inferring => {
                    let capture = capture_for_step.clone().expect("perceive precedes infer");
                    let stalled = progress_tracker.stalled_for(2);
                    let decided = self
                        .decide(
                            intent,
                            &capture,
                            hint,
                            stalled,
                            &history,
                            &previous_actions,
                            error_context.clone(),
                            &mut perception,
                            &mut stats,
                            step,
                        )
                        .await;
                    match decided {
                        Ok(decision) => {
                            pending_decision = Some(decision);
                            let _ = self.machine.transition(
                                TaskState::Acting,
                                step,
                                Some(current_url.clone()),
                                "decision ready",
                            );
                        }
                        Err(detail) => {
                            if detail.retryable && step < self.config.max_steps {
                                warn!(step, error = %detail, "inference failed, retrying");
                                error_context = Some(detail);
                                step += 1;
                                continue;
                            }
                            return self.fail(step, current_url, detail, started, stats, extracted);
                        }
                    }
                }

                TaskState::Acting => {
                    let decision = pending_decision.take().expect("infer precedes act");
                    if let Err(detail) = decision.validate() {
                        return self.fail(step, current_url, detail.with_step(step), started, stats, extracted);
                    }

                    self.maybe_prefetch(&decision, capture_for_step.as_ref());

                    match self.client.execute_action(&decision, self.config.settle_timeout).await {
                        Ok(outcome) => {
                            previous_actions.push(decision.render());
                            history.push(format!("step {}: {} -> {}", step, decision.render(), outcome.final_url));
                            if let Some(value) = outcome.extracted.clone() {
                                extracted.push(value);
                            }
                            self.update_progress(&outcome.final_url, Some(&decision), intent, started);

                            match outcome.status {
                                ActionStatus::Done => {
                                    return self.finish(
                                        FinalState::Done,
                                        step,
                                        outcome.final_url,
                                        None,
                                        "navigator declared done",
                                        started,
                                        stats,
                                        extracted,
                                    );
                                }
                                ActionStatus::Failed => {
                                    let detail = ErrorDetail::new(
                                        ErrorKind::Unknown,
                                        outcome
                                            .message
                                            .clone()
                                            .unwrap_or_else(|| "navigator declared failure".to_string()),
                                    )
                                    .with_step(step);
                                    return self.fail(step, outcome.final_url, detail, started, stats, extracted);
                                }
                                ActionStatus::Acted => {
                                    let url_changed = outcome.final_url != current_url;
                                    if url_changed || outcome.navigation_observed {
                                        self.cache.clear();
                                    } else if outcome.significant_mutation() {
                                        self.cache.invalidate_url(&current_url);
                                    }
                                    perception.after_action(&outcome, url_changed, decision.kind == ActionKind::Scroll);
                                    progress_tracker.record(outcome.any_progress());
                                    current_url = outcome.final_url;
                                    error_context = None;
                                    step += 1;
                                    let _ = self.machine.transition(
                                        TaskState::Perceiving,
                                        step,
                                        Some(current_url.clone()),
                                        "action settled",
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            let detail = e.to_detail().with_step(step).with_url(&current_url);
                            if detail.retryable && step < self.config.max_steps {
                                warn!(step, error = %detail, "action failed, re-entering perception");
                                error_context = Some(detail);
                                perception.mark_stale();
                                step += 1;
                                let _ = self.machine.transition(
                                    TaskState::Perceiving,
                                    step,
                                    Some(current_url.clone()),
                                    "retry after action failure",
                                );
                                continue;
                            }
                            return self.fail(step, current_url, detail, started, stats, extracted);
                        }
                    }
                }

                TaskState::Complete | TaskState::Failed => {
                    unreachable!("terminal states return out of the loop");
                }
            }
        }
    }

    /// Tier cascade for one step: cache, Tier 1, bypass, Tier 2, scroll
    /// retry, human escalation
    #[allow(clippy::too_many_arguments)]
    async fn decide(
        &mut self,
        intent: &str,
        capture: &StructuredTreeCapture,
        hint: PerceptionHint,
        stalled: bool,
        history: &[String],
        previous_actions: &[String],
        error_context: Option<ErrorDetail>,
        perception: &mut PerceptionCache,
        stats: &mut LoopStats,
        step: u32,
    ) -> Result<ActionDecision, ErrorDetail> {
        let assessment = PageAssessment::assess(capture, self.config.min_interactive_for_sufficient);

        let mut observation = Observation::structured(capture.clone());
        observation.history = history.to_vec();
        observation.previous_actions = previous_actions.to_vec();
        observation.error_context = error_context;
        let footprint = observation.footprint();

        // The cache only short-circuits Tier 1 while progress is being
        // made; a stalled loop must reach the escalation triggers.
        if !stalled
            && let Some(hit) = self
                .cache
                .get(&capture.url, Tier::Structured, EscalationReason::Initial, footprint)
        {
            debug!(step, url = %capture.url, "decision cache hit");
            return Ok(hit);
        }

        let request = DecideRequest::new(intent, observation.clone(), Tier::Structured);
        let tier1 = self.call_navigator(request, step).await?;

        let Some(reason) = evaluate_escalation(&tier1, assessment, hint, stalled, self.config.confidence_threshold)
        else {
            self.cache.insert(
                &capture.url,
                Tier::Structured,
                EscalationReason::Initial,
                footprint,
                tier1.clone(),
            );
            return Ok(tier1);
        };

        if reason == EscalationReason::LowConfidence
            && let Some(bypass) = dom_bypass(capture, intent)
        {
            stats.dom_bypasses += 1;
            debug!(step, "dom extraction bypass, skipping visual tier");
            return Ok(bypass);
        }

        debug!(step, ?reason, "escalating to visual tier");
        stats.tier2_escalations += 1;
        let image = self
            .client
            .capture_viewport_image()
            .await
            .map_err(|e| e.to_detail().with_step(step).with_url(&capture.url))?;

        let visual = observation.clone().with_image(image.clone());
        let request = DecideRequest::new(intent, visual, Tier::Visual).with_escalation(reason);
        let tier2 = self.call_navigator(request, step).await?;

        if tier2.kind == ActionKind::Failed || tier2.confidence >= self.config.confidence_threshold {
            return Ok(tier2);
        }

        // One scroll-hint retry when content remains below the fold
        if capture.scroll.remaining_scroll_px() > 2.0 {
            stats.scroll_retries += 1;
            let scroll = ActionDecision::scroll(1.0, "scroll hint: target might be below the fold");
            self.client
                .execute_action(&scroll, self.config.settle_timeout)
                .await
                .map_err(|e| e.to_detail().with_step(step).with_url(&capture.url))?;
            perception.mark_stale();

            let fresh = self
                .client
                .capture_structured_tree(&self.config.tree_options)
                .await
                .map_err(|e| e.to_detail().with_step(step).with_url(&capture.url))?;
            perception.store(fresh.clone());

            let mut retry_observation = Observation::structured(fresh).with_image(image);
            retry_observation.history = history.to_vec();
            retry_observation.previous_actions = previous_actions.to_vec();
            let request =
                DecideRequest::new(intent, retry_observation, Tier::Visual).with_escalation(EscalationReason::ScrollRetry);
            let retry = self.call_navigator(request, step).await?;
            if retry.kind == ActionKind::Failed || retry.confidence >= self.config.confidence_threshold {
                return Ok(retry);
            }
        }

        Err(ErrorDetail::new(
            ErrorKind::Validation,
            "human review required: visual tier confidence below threshold",
        )
        .with_step(step)
        .with_url(&capture.url))
    }

    /// Call the navigator, retrying once with correction context on
    /// malformed output
    async fn call_navigator(&self, request: DecideRequest, step: u32) -> Result<ActionDecision, ErrorDetail> {
        match self.navigator.decide(request.clone()).await {
            Ok(decision) => match decision.validate() {
                Ok(()) => Ok(decision),
                Err(_) => {
                    let previous = serde_json::to_string(&decision).unwrap_or_else(|_| decision.render());
                    self.correction_retry(request, previous, step).await
                }
            },
            Err(e) if e.is_malformed() => {
                let previous = e.to_string();
                self.correction_retry(request, previous, step).await
            }
            Err(e) => Err(map_navigator_error(e, step)),
        }
    }

    async fn correction_retry(
        &self,
        request: DecideRequest,
        previous: String,
        step: u32,
    ) -> Result<ActionDecision, ErrorDetail> {
        debug!(step, "navigator output malformed, retrying with correction");
        let retry = self
            .navigator
            .decide(request.with_correction(previous))
            .await
            .map_err(|e| map_navigator_error(e, step))?;
        retry.validate().map_err(|detail| detail.with_step(step))?;
        Ok(retry)
    }

    /// Non-blocking prefetch of the link under a click target
    fn maybe_prefetch(&self, decision: &ActionDecision, capture: Option<&StructuredTreeCapture>) {
        if !self.config.prefetch_enabled || decision.kind != ActionKind::Click {
            return;
        }
        let (Some(target), Some(capture)) = (decision.target, capture) else {
            return;
        };
        let href = capture
            .interactive_index
            .iter()
            .find(|e| e.contains(target.x, target.y))
            .and_then(|e| e.href.clone());
        if let Some(href) = href {
            let client = self.client.clone();
            tokio::spawn(async move {
                let _ = client.prefetch(&href).await;
            });
        }
    }

    fn update_progress(&self, url: &str, action: Option<&ActionDecision>, intent: &str, started: Instant) {
        let mut progress = self.progress.lock().expect("progress lock poisoned");
        progress.current_url = Some(url.to_string());
        progress.current_state = Some(self.machine.current().to_string());
        if let Some(action) = action {
            progress.current_action = Some(action.render());
        }
        progress.progress_label = Some(intent.to_string());
        progress.duration_ms = started.elapsed().as_millis() as u64;
    }

    fn fail(
        &mut self,
        step: u32,
        url: String,
        detail: ErrorDetail,
        started: Instant,
        stats: LoopStats,
        extracted: Vec<serde_json::Value>,
    ) -> LoopOutcome {
        self.finish(FinalState::Failed, step, url, Some(detail), "task failed", started, stats, extracted)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &mut self,
        final_state: FinalState,
        steps_taken: u32,
        url: String,
        error: Option<ErrorDetail>,
        reason: &str,
        started: Instant,
        mut stats: LoopStats,
        extracted: Vec<serde_json::Value>,
    ) -> LoopOutcome {
        let terminal = if final_state == FinalState::Done {
            TaskState::Complete
        } else {
            TaskState::Failed
        };
        if let Err(e) = self
            .machine
            .transition_with_error(terminal, steps_taken, Some(url.clone()), reason, error.clone())
        {
            debug!(error = %e, "terminal transition skipped");
        } else {
            let _ = self.machine.reset(steps_taken, "cleanup");
        }

        let (hits, misses) = self.cache.counters();
        stats.cache_hits = hits;
        stats.cache_misses = misses;
        stats.duration_ms = started.elapsed().as_millis() as u64;

        info!(?final_state, steps_taken, url = %url, "loop finished");
        LoopOutcome {
            final_state,
            steps_taken,
            final_url: Some(url),
            error,
            extracted,
            stats,
        }
    }
}

fn map_navigator_error(error: NavigatorError, step: u32) -> ErrorDetail {
    let retryable = error.is_retryable();
    let detail = match &error {
        NavigatorError::RateLimited { .. } => ErrorDetail::new(ErrorKind::Network, error.to_string()),
        NavigatorError::Api { status, .. } => {
            ErrorDetail::new(ErrorKind::Protocol, error.to_string()).with_status_code(*status)
        }
        NavigatorError::Network(_) => ErrorDetail::new(ErrorKind::Network, error.to_string()),
        NavigatorError::Timeout(_) => ErrorDetail::new(ErrorKind::Timeout, error.to_string()),
        NavigatorError::Malformed(_) => ErrorDetail::new(ErrorKind::Validation, error.to_string()),
    };
    detail.with_retryable(retryable).with_step(step)
}
