//! Task domain type and intent classification records

use serde::{Deserialize, Serialize};

use super::error::ErrorDetail;
use super::id::{generate_id, now_ms};
use super::plan::DecompositionPlan;
use super::priority::Priority;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, not yet holding a session
    #[default]
    Queued,
    /// Holding a lease and executing
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never emit further scheduler events
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Classified intent kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    Navigate,
    Research,
    Transact,
    Generate,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Navigate => write!(f, "NAVIGATE"),
            Self::Research => write!(f, "RESEARCH"),
            Self::Transact => write!(f, "TRANSACT"),
            Self::Generate => write!(f, "GENERATE"),
        }
    }
}

/// User-facing command mode; overrides classification when not AUTO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    #[default]
    Auto,
    Browse,
    Do,
    Make,
    Research,
}

impl Mode {
    /// The intent kind this mode forces, if any
    pub fn intent_override(&self) -> Option<IntentKind> {
        match self {
            Self::Auto => None,
            Self::Browse => Some(IntentKind::Navigate),
            Self::Do => Some(IntentKind::Transact),
            Self::Make => Some(IntentKind::Generate),
            Self::Research => Some(IntentKind::Research),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "BROWSE" => Ok(Self::Browse),
            "DO" => Ok(Self::Do),
            "MAKE" => Ok(Self::Make),
            "RESEARCH" => Ok(Self::Research),
            _ => Err(format!("Unknown mode: {}", s)),
        }
    }
}

/// How a classification was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationSource {
    /// Forced by an explicit non-AUTO mode
    ModeOverride,
    /// Input looked like a URL
    UrlDetection,
    /// Keyword heuristics matched
    KeywordHeuristic,
    /// No signal; research by default
    DefaultFallback,
}

/// Result of classifying an intent string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: IntentKind,
    pub source: ClassificationSource,
    pub confidence: f64,
    pub reason: String,
}

/// Partial result snapshot, frozen when a task is cancelled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    /// Last known page url
    pub current_url: Option<String>,

    /// Loop state label at freeze time
    pub current_state: Option<String>,

    /// Last dispatched action, rendered for display
    pub current_action: Option<String>,

    /// Human-readable progress label (e.g. subtask intent)
    pub progress_label: Option<String>,

    /// Wall time from start to freeze
    pub duration_ms: u64,
}

/// A submitted unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: String,

    /// Original intent text, verbatim
    pub intent: String,

    /// Classification result
    pub classification: Classification,

    /// Explicit mode override, when the caller supplied one
    pub mode_override: Option<Mode>,

    /// Decomposition plan (set before enqueue)
    pub plan: Option<DecompositionPlan>,

    /// Queue placement priority
    pub priority: Priority,

    /// Current status
    pub status: TaskStatus,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// When the task first acquired a session
    pub started_at: Option<i64>,

    /// When the task reached a terminal status
    pub finished_at: Option<i64>,

    /// Snapshot frozen on cancellation
    pub partial: Option<PartialResult>,

    /// Final page url on success
    pub final_url: Option<String>,

    /// Failure detail on error
    pub error: Option<ErrorDetail>,
}

impl Task {
    /// Create a new queued task
    pub fn new(intent: impl Into<String>, classification: Classification) -> Self {
        let intent = intent.into();
        Self {
            id: generate_id("task", &intent),
            intent,
            classification,
            mode_override: None,
            plan: None,
            priority: Priority::default(),
            status: TaskStatus::Queued,
            created_at: now_ms(),
            started_at: None,
            finished_at: None,
            partial: None,
            final_url: None,
            error: None,
        }
    }

    /// Builder: record the caller's mode override
    pub fn with_mode_override(mut self, mode: Mode) -> Self {
        self.mode_override = Some(mode);
        self
    }

    /// Builder: attach the decomposition plan
    pub fn with_plan(mut self, plan: DecompositionPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Builder: set acquisition priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Transition to running; records the start timestamp once
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now_ms());
        }
    }

    /// Terminal: success with the final page url
    pub fn mark_succeeded(&mut self, final_url: Option<String>) {
        self.status = TaskStatus::Succeeded;
        self.final_url = final_url;
        self.finished_at = Some(now_ms());
    }

    /// Terminal: failure with detail
    pub fn mark_failed(&mut self, error: ErrorDetail) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now_ms());
    }

    /// Terminal: cancelled, freezing the partial result snapshot
    pub fn mark_cancelled(&mut self, partial: PartialResult) {
        self.status = TaskStatus::Cancelled;
        self.partial = Some(partial);
        self.finished_at = Some(now_ms());
    }

    /// Whether the task has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
