//! Ghostrun - Agentic Browser Automation Runtime
//!
//! Ghostrun takes high-level natural-language intents, decomposes them into
//! verifiable subtask plans, and drives them across a warm pool of isolated
//! ghost browser sessions. Each session runs a perception-action loop around
//! an LLM Navigator with tiered escalation, crash retry, resource budgets,
//! and non-cooperative cancellation.
//!
//! # Core Concepts
//!
//! - **Ghost Sessions**: isolated browser contexts leased exclusively to one
//!   task at a time, replenished on crash so the pool topology stays stable
//! - **Tiered Perception**: cheap structured perception by default, visual
//!   inference only when confidence or page signals demand it
//! - **Typed Status Stream**: every lifecycle step emits an ordered, schema
//!   versioned status event for the external controller
//! - **Budgeted Execution**: sampled CPU/memory enforcement with a sustained
//!   violation window before any enforcement fires
//!
//! # Modules
//!
//! - [`session`] - SessionClient capability trait and observation types
//! - [`navigator`] - Navigator capability trait, decisions, and adapters
//! - [`pool`] - ghost session pool with leasing and replenishment
//! - [`r#loop`] - perception-action execution engine
//! - [`planning`] - intent classification and decomposition
//! - [`scheduler`] - per-task attempt loop with crash retry
//! - [`orchestrator`] - public submission surface and status fan-out

pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod monitor;
pub mod navigator;
pub mod orchestrator;
pub mod planning;
pub mod pool;
pub mod scheduler;
pub mod session;
pub mod state;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

// Re-export commonly used types
pub use config::{BudgetSettings, Config, HttpCacheMode, InterceptionMode, NavigatorSettings, PoolSettings};
pub use domain::{
    Classification, ClassificationSource, DecompositionPlan, ErrorDetail, ErrorKind, IntentKind, Mode, PartialResult,
    Priority, Subtask, SubtaskStatus, Task, TaskStatus, VerificationType,
};
pub use events::{
    QueueEventKind, SchedulerEventKind, StatusBus, StatusEmitter, StatusEvent, StatusPayload, spawn_status_logger,
};
pub use monitor::{BudgetMode, BudgetViolation, MonitorHandle, ResourceBudgetMonitor};
pub use navigator::{
    ActionDecision, ActionKind, DecideRequest, DecisionCache, EscalationReason, FixtureNavigator, HttpNavigator,
    Navigator, NavigatorError, SpecialKey, TargetPoint, Tier,
};
pub use orchestrator::{Dispatch, ExecutionPlan, Orchestrator, Route, SubmissionRequest, SubmissionResult};
pub use planning::{Decomposer, PlannerConfig, classify_intent, normalize_url};
pub use pool::{Lease, PoolConfig, PoolError, PoolManager, PoolSnapshot, SessionFactory, SlotState};
pub use r#loop::{FinalState, LoopConfig, LoopOutcome, LoopStats, PerceptionActionLoop};
pub use scheduler::{RunResult, SchedulerConfig, SchedulerError, TaskRunner, TaskScheduler};
pub use session::{
    ActionOutcome, ActionStatus, MutationSummary, NavigationOutcome, Observation, ResourceSample, ScrollSnapshot,
    SessionClient, SessionError, StructuredTreeCapture, ViewportImage,
};
pub use state::{StateError, TaskState, TaskStateMachine};
