//! Submission, dispatch record, and routing types

use serde::{Deserialize, Serialize};

use crate::domain::{Classification, IntentKind, Mode};

/// Public command submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Free-form command text
    pub text: String,

    /// Classification override mode
    #[serde(default)]
    pub mode: Mode,

    /// Free-form provenance (command bar, api, test)
    #[serde(default)]
    pub source: String,

    /// Pool queue priority
    #[serde(default)]
    pub priority: crate::domain::Priority,
}

impl SubmissionRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: Mode::Auto,
            source: "api".to_string(),
            priority: crate::domain::Priority::Background,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: crate::domain::Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Where a classified command is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Route {
    /// Foreground navigation in the top tab; no ghost task is spawned
    TopTabNavigate,
    /// Ghost session task through the scheduler
    GhostTask,
    /// Generation route served by the maker collaborator, not the core
    MakerGenerate,
}

impl Route {
    pub fn for_intent(intent: IntentKind) -> Self {
        match intent {
            IntentKind::Navigate => Self::TopTabNavigate,
            IntentKind::Generate => Self::MakerGenerate,
            IntentKind::Research | IntentKind::Transact => Self::GhostTask,
        }
    }
}

/// Execution plan derived from the route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub route: Route,
    pub run_in_top_tab: bool,
    pub spawn_ghost_tabs: bool,
    pub primary_engine: String,
}

impl ExecutionPlan {
    pub fn for_route(route: Route) -> Self {
        match route {
            Route::TopTabNavigate => Self {
                route,
                run_in_top_tab: true,
                spawn_ghost_tabs: false,
                primary_engine: "top_tab".to_string(),
            },
            Route::GhostTask => Self {
                route,
                run_in_top_tab: false,
                spawn_ghost_tabs: true,
                primary_engine: "ghost_pool".to_string(),
            },
            Route::MakerGenerate => Self {
                route,
                run_in_top_tab: false,
                spawn_ghost_tabs: false,
                primary_engine: "maker".to_string(),
            },
        }
    }
}

/// Record of one accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub dispatch_id: String,
    pub submitted_at: i64,
    pub source: String,
    pub mode: Mode,
    pub mode_override: Option<Mode>,
    pub workspace_context_id: Option<String>,
    pub raw_input: String,
    pub normalized_url: Option<String>,
    pub classification: Classification,
    pub execution_plan: ExecutionPlan,
    pub task_id: Option<String>,
}

/// Result returned to the submitting surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub accepted: bool,
    pub clear_input: bool,
    pub error: Option<String>,
    pub dispatch: Option<Dispatch>,
}

impl SubmissionResult {
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            accepted: false,
            clear_input: false,
            error: Some(error.into()),
            dispatch: None,
        }
    }

    pub fn accepted(dispatch: Dispatch) -> Self {
        Self {
            accepted: true,
            clear_input: true,
            error: None,
            dispatch: Some(dispatch),
        }
    }

    /// The spawned task id, when a ghost task was created
    pub fn task_id(&self) -> Option<&str> {
        self.dispatch.as_ref().and_then(|d| d.task_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_for_intent() {
        assert_eq!(Route::for_intent(IntentKind::Navigate), Route::TopTabNavigate);
        assert_eq!(Route::for_intent(IntentKind::Research), Route::GhostTask);
        assert_eq!(Route::for_intent(IntentKind::Transact), Route::GhostTask);
        assert_eq!(Route::for_intent(IntentKind::Generate), Route::MakerGenerate);
    }

    #[test]
    fn test_route_wire_format() {
        assert_eq!(serde_json::to_string(&Route::MakerGenerate).unwrap(), "\"MAKER_GENERATE\"");
        assert_eq!(serde_json::to_string(&Route::TopTabNavigate).unwrap(), "\"TOP_TAB_NAVIGATE\"");
    }

    #[test]
    fn test_execution_plan_shapes() {
        let top = ExecutionPlan::for_route(Route::TopTabNavigate);
        assert!(top.run_in_top_tab);
        assert!(!top.spawn_ghost_tabs);

        let ghost = ExecutionPlan::for_route(Route::GhostTask);
        assert!(!ghost.run_in_top_tab);
        assert!(ghost.spawn_ghost_tabs);
        assert_eq!(ghost.primary_engine, "ghost_pool");

        let maker = ExecutionPlan::for_route(Route::MakerGenerate);
        assert!(!maker.spawn_ghost_tabs);
    }

    #[test]
    fn test_submission_request_deserializes_with_defaults() {
        let request: SubmissionRequest = serde_json::from_str(r#"{"text": "google.com"}"#).unwrap();
        assert_eq!(request.mode, Mode::Auto);
        assert_eq!(request.priority, crate::domain::Priority::Background);

        let request: SubmissionRequest =
            serde_json::from_str(r#"{"text": "google.com", "mode": "MAKE", "source": "command-bar"}"#).unwrap();
        assert_eq!(request.mode, Mode::Make);
        assert_eq!(request.source, "command-bar");
    }
}
