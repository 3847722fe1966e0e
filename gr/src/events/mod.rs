//! Status event stream for Ghostrun
//!
//! Components publish typed status events onto a broadcast bus owned by
//! the orchestrator; consumers (controller, loggers) subscribe. Events are
//! lossless and strictly ordered per task.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, StatusBus, StatusEmitter, spawn_status_logger};
pub use types::{
    BoundaryError, QueueEventKind, QueuePayload, SCHEMA_VERSION, SchedulerEventKind, SchedulerPayload, StatePayload,
    StatusEvent, StatusPayload, SubtaskPayload, validate_envelope,
};
