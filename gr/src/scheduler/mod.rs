//! Task scheduler
//!
//! Runs one submitted task through its retry attempts, each over a fresh
//! lease, surfacing typed scheduler events, enforcing resource budgets,
//! and honoring non-cooperative cancellation.

mod config;
mod core;

pub use config::SchedulerConfig;
pub use core::{AttemptContext, RunResult, SchedulerError, TaskRunner, TaskScheduler, is_crash_message};
