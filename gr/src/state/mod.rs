//! Per-task state machine with enforced transitions

mod machine;

pub use machine::{StateError, TaskState, TaskStateMachine};
