//! Navigator capability: LLM-backed action decisions
//!
//! Given an observation and the task intent, the navigator returns the
//! next action decision with a confidence. Two tiers exist: the cheap
//! structured-only tier and the expensive visual tier. Adapters: an HTTP
//! client speaking a JSON decide protocol, and a fixture player for
//! recorded or scripted runs.

mod cache;
mod client;
mod decision;
mod http;

pub use cache::DecisionCache;
pub use client::{DecideRequest, EscalationReason, FixtureNavigator, Navigator, NavigatorError, Tier};
pub use decision::{ActionDecision, ActionKind, SpecialKey, TargetPoint};
pub use http::HttpNavigator;
