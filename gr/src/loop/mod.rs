//! Perception-action loop
//!
//! Drives one task to completion inside one session: repeatedly observe,
//! decide, act, until a terminal decision or the hard step cap. Tier 1
//! (structured) inference runs by default; the visual tier is reserved
//! for low confidence, deficient pages, stalled progress, or an explicit
//! hint.

mod config;
mod engine;
mod escalation;
mod perception;

pub use config::LoopConfig;
pub use engine::{FinalState, LoopOutcome, LoopStats, PerceptionActionLoop};
pub use escalation::{dom_bypass, evaluate_escalation, normalize_label};
pub use perception::{PageAssessment, PerceptionCache, ProgressTracker};
