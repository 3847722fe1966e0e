//! Subtask domain type and verification predicates

use serde::{Deserialize, Serialize};

/// Subtask lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Declarative success condition for a subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    /// A specific element must exist on the page
    ElementPresent,
    /// The final url must match a pattern
    UrlMatches,
    /// Data must have been extracted
    DataExtracted,
    /// An action completed without error (relaxed)
    ActionConfirmed,
    /// Cannot be verified automatically; routes to a human
    HumanReview,
}

/// Whether a subtask may run alongside its siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Parallel,
    #[default]
    Sequential,
}

/// Per-subtask hint about which perception tier to start at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PerceptionHint {
    StructuredSufficient,
    VisualRequired,
    #[default]
    Unknown,
}

/// One verifiable unit within a decomposition plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// Stable id, unique within the plan
    pub id: String,

    /// Human-readable intent for this step
    pub intent: String,

    /// URL to start from, when known
    pub start_url: Option<String>,

    /// Verification predicate type
    pub verification_type: VerificationType,

    /// Textual condition for the predicate
    pub verification_condition: String,

    /// Current status
    pub status: SubtaskStatus,

    /// Parallel or sequential execution
    pub execution_mode: ExecutionMode,

    /// Ids of subtasks that must complete first
    pub depends_on: Vec<String>,

    /// Perception tier hint
    pub perception_hint: PerceptionHint,
}

impl Subtask {
    /// Create a pending sequential subtask
    pub fn new(id: impl Into<String>, intent: impl Into<String>, verification_type: VerificationType) -> Self {
        let intent = intent.into();
        Self {
            id: id.into(),
            verification_condition: intent.clone(),
            intent,
            start_url: None,
            verification_type,
            status: SubtaskStatus::Pending,
            execution_mode: ExecutionMode::Sequential,
            depends_on: Vec::new(),
            perception_hint: PerceptionHint::Unknown,
        }
    }

    /// Builder: set the start url
    pub fn with_start_url(mut self, url: impl Into<String>) -> Self {
        self.start_url = Some(url.into());
        self
    }

    /// Builder: set the verification condition text
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.verification_condition = condition.into();
        self
    }

    /// Builder: add a dependency
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Builder: set the perception hint
    pub fn with_perception_hint(mut self, hint: PerceptionHint) -> Self {
        self.perception_hint = hint;
        self
    }

    /// Whether this subtask must be routed to a human instead of dispatched
    pub fn requires_human_review(&self) -> bool {
        self.verification_type == VerificationType::HumanReview
    }

    /// Whether this subtask has finished (either way)
    pub fn is_finished(&self) -> bool {
        matches!(self.status, SubtaskStatus::Complete | SubtaskStatus::Failed)
    }
}

/// Check that subtask dependencies form a DAG
///
/// Returns the id of a subtask participating in a cycle, if any.
pub fn find_dependency_cycle(subtasks: &[Subtask]) -> Option<String> {
    use std::collections::{HashMap, HashSet};

    let index: HashMap<&str, &Subtask> = subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut visiting = HashSet::new();
    let mut done = HashSet::new();

    fn visit<'a>(
        id: &'a str,
        index: &HashMap<&'a str, &'a Subtask>,
        visiting: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> bool {
        if done.contains(id) {
            return false;
        }
        if !visiting.insert(id) {
            return true;
        }
        if let Some(subtask) = index.get(id) {
            for dep in &subtask.depends_on {
                if index.contains_key(dep.as_str()) && visit(dep, index, visiting, done) {
                    return true;
                }
            }
        }
        visiting.remove(id);
        done.insert(id);
        false
    }

    for subtask in subtasks {
        if visit(&subtask.id, &index, &mut visiting, &mut done) {
            return Some(subtask.id.clone());
        }
    }
    None
}
