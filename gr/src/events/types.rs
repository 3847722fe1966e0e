//! Status event envelope and tagged payload types
//!
//! The payload is a discriminated union over QUEUE / STATE / SCHEDULER /
//! SUBTASK kinds. Every envelope carries a schema version tag; boundary
//! validation rejects unknown kinds and version mismatches before routing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ErrorDetail, Priority, SubtaskStatus, VerificationType};
use crate::state::TaskState;

/// Wire schema version for status payloads
pub const SCHEMA_VERSION: u32 = 1;

/// Queue event kinds emitted by the pool manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueEventKind {
    Enqueued,
    Dispatched,
    Released,
}

/// Scheduler event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerEventKind {
    Started,
    Succeeded,
    Failed,
    CrashDetected,
    Retrying,
    ResourceBudgetExceeded,
    ResourceBudgetKilled,
}

impl SchedulerEventKind {
    /// Terminal scheduler events end the task's status stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Pool queue activity for one acquisition request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePayload {
    pub event: QueueEventKind,
    pub priority: Priority,
    pub queue_depth: usize,
    pub available: usize,
    pub in_use: usize,
    pub context_id: Option<String>,
    pub wait_ms: u64,
    pub was_queued: bool,
}

/// One accepted task state machine transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub from: TaskState,
    pub to: TaskState,
    pub step: u32,
    pub url: Option<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub timestamp_ms: i64,
}

/// Scheduler attempt lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerPayload {
    pub event: SchedulerEventKind,
    pub priority: Priority,
    pub context_id: Option<String>,
    pub assignment_wait_ms: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Progress on one subtask of the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskPayload {
    pub subtask_id: String,
    pub subtask_intent: String,
    pub status: SubtaskStatus,
    pub verification_type: VerificationType,
    pub verification_condition: String,
    pub current_subtask_index: usize,
    pub total_subtasks: usize,
    pub attempt: u32,
    pub checkpoint_last_completed_subtask_index: Option<usize>,
    pub reason: Option<String>,
}

/// Tagged union over the four status payload kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StatusPayload {
    #[serde(rename = "QUEUE")]
    Queue(QueuePayload),
    #[serde(rename = "STATE")]
    State(StatePayload),
    #[serde(rename = "SCHEDULER")]
    Scheduler(SchedulerPayload),
    #[serde(rename = "SUBTASK")]
    Subtask(SubtaskPayload),
}

impl StatusPayload {
    /// Short kind tag, matching the wire discriminant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Queue(_) => "QUEUE",
            Self::State(_) => "STATE",
            Self::Scheduler(_) => "SCHEDULER",
            Self::Subtask(_) => "SUBTASK",
        }
    }
}

/// Envelope delivered on the status stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Schema version tag
    pub schema: u32,

    /// Task this event belongs to
    pub task_id: String,

    /// Session context, once one is assigned
    pub context_id: Option<String>,

    /// The typed payload
    pub payload: StatusPayload,
}

impl StatusEvent {
    pub fn new(task_id: impl Into<String>, context_id: Option<String>, payload: StatusPayload) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            task_id: task_id.into(),
            context_id,
            payload,
        }
    }
}

/// Rejection reasons at the routing boundary
#[derive(Debug, Error, PartialEq)]
pub enum BoundaryError {
    #[error("unsupported schema version {0} (expected {SCHEMA_VERSION})")]
    UnsupportedSchema(u32),

    #[error("unknown payload kind '{0}'")]
    UnknownKind(String),

    #[error("malformed status payload: {0}")]
    Malformed(String),
}

/// Validate a raw JSON envelope before routing
///
/// Checks the schema tag and payload kind explicitly so the rejection
/// reason is precise, then deserializes the full envelope.
pub fn validate_envelope(value: &serde_json::Value) -> Result<StatusEvent, BoundaryError> {
    let schema = value
        .get("schema")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| BoundaryError::Malformed("missing schema tag".to_string()))?;
    if schema != SCHEMA_VERSION as u64 {
        return Err(BoundaryError::UnsupportedSchema(schema as u32));
    }

    let kind = value
        .get("payload")
        .and_then(|p| p.get("kind"))
        .and_then(|k| k.as_str())
        .ok_or_else(|| BoundaryError::Malformed("missing payload kind".to_string()))?;
    if !matches!(kind, "QUEUE" | "STATE" | "SCHEDULER" | "SUBTASK") {
        return Err(BoundaryError::UnknownKind(kind.to_string()));
    }

    serde_json::from_value(value.clone()).map_err(|e| BoundaryError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    fn queue_payload(event: QueueEventKind) -> StatusPayload {
        StatusPayload::Queue(QueuePayload {
            event,
            priority: Priority::Background,
            queue_depth: 0,
            available: 3,
            in_use: 1,
            context_id: Some("ghost-1".to_string()),
            wait_ms: 0,
            was_queued: false,
        })
    }

    #[test]
    fn test_payload_kind_tags() {
        assert_eq!(queue_payload(QueueEventKind::Enqueued).kind(), "QUEUE");

        let payload = StatusPayload::Scheduler(SchedulerPayload {
            event: SchedulerEventKind::Started,
            priority: Priority::Foreground,
            context_id: Some("ghost-2".to_string()),
            assignment_wait_ms: 12,
            duration_ms: 0,
            error: None,
        });
        assert_eq!(payload.kind(), "SCHEDULER");
    }

    #[test]
    fn test_wire_format() {
        let event = StatusEvent::new("task-1", Some("ghost-1".to_string()), queue_payload(QueueEventKind::Dispatched));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["schema"], 1);
        assert_eq!(json["payload"]["kind"], "QUEUE");
        assert_eq!(json["payload"]["event"], "DISPATCHED");
        assert_eq!(json["task_id"], "task-1");
    }

    #[test]
    fn test_scheduler_event_terminality() {
        assert!(SchedulerEventKind::Succeeded.is_terminal());
        assert!(SchedulerEventKind::Failed.is_terminal());
        assert!(!SchedulerEventKind::Started.is_terminal());
        assert!(!SchedulerEventKind::Retrying.is_terminal());
        assert!(!SchedulerEventKind::CrashDetected.is_terminal());
        assert!(!SchedulerEventKind::ResourceBudgetExceeded.is_terminal());
    }

    #[test]
    fn test_validate_envelope_accepts_valid() {
        let event = StatusEvent::new("task-1", None, queue_payload(QueueEventKind::Enqueued));
        let json = serde_json::to_value(&event).unwrap();
        let back = validate_envelope(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_validate_envelope_rejects_bad_schema() {
        let event = StatusEvent::new("task-1", None, queue_payload(QueueEventKind::Enqueued));
        let mut json = serde_json::to_value(&event).unwrap();
        json["schema"] = serde_json::json!(99);

        assert_eq!(validate_envelope(&json), Err(BoundaryError::UnsupportedSchema(99)));
    }

    #[test]
    fn test_validate_envelope_rejects_unknown_kind() {
        let event = StatusEvent::new("task-1", None, queue_payload(QueueEventKind::Enqueued));
        let mut json = serde_json::to_value(&event).unwrap();
        json["payload"]["kind"] = serde_json::json!("TELEMETRY");

        assert_eq!(
            validate_envelope(&json),
            Err(BoundaryError::UnknownKind("TELEMETRY".to_string()))
        );
    }

    #[test]
    fn test_validate_envelope_rejects_missing_fields() {
        let json = serde_json::json!({ "task_id": "task-1" });
        assert!(matches!(validate_envelope(&json), Err(BoundaryError::Malformed(_))));

        let json = serde_json::json!({
            "schema": 1,
            "task_id": "task-1",
            "context_id": null,
            "payload": { "kind": "QUEUE" }
        });
        assert!(matches!(validate_envelope(&json), Err(BoundaryError::Malformed(_))));
    }

    #[test]
    fn test_state_payload_with_error_roundtrip() {
        let payload = StatusPayload::State(StatePayload {
            from: TaskState::Acting,
            to: TaskState::Failed,
            step: 4,
            url: Some("https://example.com/checkout".to_string()),
            reason: "action failed".to_string(),
            error: Some(ErrorDetail::new(ErrorKind::Protocol, "target closed")),
            timestamp_ms: 1_700_000_000_000,
        });
        let event = StatusEvent::new("task-2", Some("ghost-3".to_string()), payload);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["from"], "acting");
        assert_eq!(json["payload"]["error"]["kind"], "protocol");

        let back = validate_envelope(&json).unwrap();
        assert_eq!(back, event);
    }
}
