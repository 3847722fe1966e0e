//! Task state machine
//!
//! Enforces the perception-action lifecycle. Any transition outside the
//! table is rejected with a state-kind error; every accepted transition
//! emits one STATE event carrying from, to, step, url, and reason.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ErrorDetail, ErrorKind, now_ms};
use crate::events::{StatePayload, StatusEmitter};

/// Loop execution state for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Quiescent, pre-start or post-cleanup
    #[default]
    Idle,
    /// Navigating to the start url
    Loading,
    /// Capturing the structured tree / viewport
    Perceiving,
    /// Waiting on the navigator
    Inferring,
    /// Dispatching input and waiting for settle
    Acting,
    /// Terminal success (before cleanup returns to idle)
    Complete,
    /// Terminal failure (before cleanup returns to idle)
    Failed,
}

impl TaskState {
    /// Destinations allowed from this state
    pub fn allowed_destinations(&self) -> &'static [TaskState] {
        match self {
            Self::Idle => &[Self::Loading],
            Self::Loading => &[Self::Perceiving, Self::Failed],
            Self::Perceiving => &[Self::Inferring, Self::Failed],
            Self::Inferring => &[Self::Acting, Self::Failed],
            Self::Acting => &[Self::Perceiving, Self::Complete, Self::Failed],
            Self::Complete => &[Self::Idle],
            Self::Failed => &[Self::Idle],
        }
    }

    /// Whether the table permits `self -> to`
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        self.allowed_destinations().contains(&to)
    }

    /// Terminal states before the return to idle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Perceiving => write!(f, "perceiving"),
            Self::Inferring => write!(f, "inferring"),
            Self::Acting => write!(f, "acting"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// State machine errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StateError {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: TaskState, to: TaskState },
}

impl StateError {
    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail::new(ErrorKind::State, self.to_string())
    }
}

/// Per-task lifecycle enforcement with event emission
pub struct TaskStateMachine {
    current: TaskState,
    emitter: Option<StatusEmitter>,
}

impl TaskStateMachine {
    /// Machine starting at idle, without event emission
    pub fn new() -> Self {
        Self {
            current: TaskState::Idle,
            emitter: None,
        }
    }

    /// Machine that emits a STATE event on every accepted transition
    pub fn with_emitter(emitter: StatusEmitter) -> Self {
        Self {
            current: TaskState::Idle,
            emitter: Some(emitter),
        }
    }

    pub fn current(&self) -> TaskState {
        self.current
    }

    /// Request a transition
    ///
    /// On acceptance, updates the state, emits the event, and returns the
    /// payload. On rejection, the state is unchanged.
    pub fn transition(
        &mut self,
        to: TaskState,
        step: u32,
        url: Option<String>,
        reason: impl Into<String>,
    ) -> Result<StatePayload, StateError> {
        self.transition_with_error(to, step, url, reason, None)
    }

    /// Transition carrying a failure detail (used for -> failed)
    pub fn transition_with_error(
        &mut self,
        to: TaskState,
        step: u32,
        url: Option<String>,
        reason: impl Into<String>,
        error: Option<ErrorDetail>,
    ) -> Result<StatePayload, StateError> {
        let from = self.current;
        if !from.can_transition_to(to) {
            return Err(StateError::IllegalTransition { from, to });
        }

        self.current = to;
        let payload = StatePayload {
            from,
            to,
            step,
            url,
            reason: reason.into(),
            error,
            timestamp_ms: now_ms(),
        };
        if let Some(emitter) = &self.emitter {
            emitter.state(payload.clone());
        }
        Ok(payload)
    }

    /// Return a terminal state to idle (cleanup)
    pub fn reset(&mut self, step: u32, reason: impl Into<String>) -> Result<StatePayload, StateError> {
        self.transition(TaskState::Idle, step, None, reason)
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
