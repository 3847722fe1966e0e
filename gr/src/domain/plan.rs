//! Decomposition plan: primary subtasks plus optional fallback

use serde::{Deserialize, Serialize};

use super::id::now_ms;
use super::subtask::{Subtask, SubtaskStatus};

/// Ordered subtask plan produced by the decomposer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionPlan {
    /// The original intent, verbatim
    pub intent: String,

    /// Primary ordered subtasks
    pub subtasks: Vec<Subtask>,

    /// Alternative plan to switch to after primary failure
    pub fallback: Option<Vec<Subtask>>,

    /// Step count implied by the intent text
    pub implied_steps: u32,

    /// Label of the generator that produced this plan
    pub generator: String,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl DecompositionPlan {
    /// Create a plan over the given subtasks
    pub fn new(intent: impl Into<String>, subtasks: Vec<Subtask>, implied_steps: u32) -> Self {
        Self {
            intent: intent.into(),
            subtasks,
            fallback: None,
            implied_steps,
            generator: "heuristic-v1".to_string(),
            created_at: now_ms(),
        }
    }

    /// Builder: attach a fallback plan
    pub fn with_fallback(mut self, fallback: Vec<Subtask>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// A plan counts as decomposed when the intent implied three or more steps
    pub fn is_decomposed(&self) -> bool {
        self.implied_steps >= 3
    }

    /// Activate the plan: the first subtask (and only it) enters in_progress
    pub fn activate(&mut self) {
        if let Some(first) = self.subtasks.first_mut() {
            first.status = SubtaskStatus::InProgress;
        }
    }

    /// Swap the primary subtasks for the fallback, resetting statuses
    ///
    /// Returns false when no fallback is stored.
    pub fn switch_to_fallback(&mut self) -> bool {
        match self.fallback.take() {
            Some(mut fallback) => {
                for subtask in &mut fallback {
                    subtask.status = SubtaskStatus::Pending;
                }
                self.subtasks = fallback;
                self.activate();
                true
            }
            None => false,
        }
    }

    /// Index of the first unfinished subtask
    pub fn current_index(&self) -> Option<usize> {
        self.subtasks.iter().position(|s| !s.is_finished())
    }

    /// Index of the last completed subtask, for checkpointing
    pub fn last_completed_index(&self) -> Option<usize> {
        self.subtasks.iter().rposition(|s| s.status == SubtaskStatus::Complete)
    }

    /// Total number of primary subtasks
    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    /// Whether the plan has no subtasks
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }
}
