//! Intent classification and decomposition
//!
//! Turns free text into a classification (navigate / research / transact /
//! generate) and a plan of verifiable subtasks with an optional fallback.
//! Everything here is deterministic heuristics over verbs, connectors,
//! and URL shapes; no model call is involved.

mod classifier;
mod decomposer;

pub use classifier::{classify_intent, looks_like_url, normalize_url};
pub use decomposer::{Decomposer, PlannerConfig};
