//! SessionClient capability boundary
//!
//! One [`SessionClient`] drives one isolated ghost browser session:
//! navigate, perceive (structured tree + viewport image), dispatch input,
//! sample resources, observe crashes, close. The core never talks to a
//! browser protocol directly; real, recorded-fixture, and deterministic
//! stub implementations all live behind this trait.

mod client;
mod stub;
mod types;

pub use client::{CrashSignal, SessionClient, SessionError};
pub use stub::{StubPage, StubSessionClient};
pub use types::{
    ActionOutcome, ActionStatus, Bounds, DeficiencySignals, InteractiveElement, MutationSummary, NavigationOutcome,
    Observation, ResourceSample, ScrollSnapshot, StructuredTreeCapture, TreeCaptureOptions, ViewportImage,
};
