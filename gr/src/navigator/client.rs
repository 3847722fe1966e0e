//! Navigator trait definition, tiers, and the fixture adapter

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::Observation;

use super::decision::ActionDecision;

/// Inference tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Cheap: structured tree only
    Structured,
    /// Expensive: structured tree plus viewport image
    Visual,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::Visual => write!(f, "visual"),
        }
    }
}

/// Why the loop escalated (or didn't)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// First call on a step, no escalation
    #[default]
    Initial,
    /// Tier 1 confidence fell below threshold
    LowConfidence,
    /// Tier 1 returned FAILED
    TierOneFailed,
    /// Page classified structured-deficient
    StructuredDeficient,
    /// No observable progress for two steps
    NoProgress,
    /// Decomposition hinted visual_required
    VisualHint,
    /// Tier 2 retry after a scroll hint
    ScrollRetry,
}

/// One decision request handed to the navigator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideRequest {
    /// The subtask or task intent being pursued
    pub intent: String,

    /// Current page observation
    pub observation: Observation,

    /// Requested inference tier
    pub tier: Tier,

    /// Why this tier was chosen
    pub escalation: EscalationReason,

    /// Previous malformed response, for a correction retry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
}

impl DecideRequest {
    pub fn new(intent: impl Into<String>, observation: Observation, tier: Tier) -> Self {
        Self {
            intent: intent.into(),
            observation,
            tier,
            escalation: EscalationReason::Initial,
            correction: None,
        }
    }

    pub fn with_escalation(mut self, escalation: EscalationReason) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_correction(mut self, previous: impl Into<String>) -> Self {
        self.correction = Some(previous.into());
        self
    }
}

/// Errors from a navigator adapter
#[derive(Debug, Error)]
pub enum NavigatorError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed navigator output: {0}")]
    Malformed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

impl NavigatorError {
    /// Whether a retry of the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Network(_) => true,
            Self::Timeout(_) => true,
            Self::Malformed(_) => false,
        }
    }

    /// Whether this is a malformed-output failure (correction retry path)
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// LLM-backed decision maker over one observation
///
/// Implementations must be stateless across calls; all context travels in
/// the request. Variants: HTTP-backed, recorded-fixture, deterministic
/// stub for tests.
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Decide the next action for the given observation and intent
    async fn decide(&self, request: DecideRequest) -> Result<ActionDecision, NavigatorError>;
}

/// Plays back a scripted sequence of decisions
///
/// Doubles as the recorded-fixture variant and the deterministic stub for
/// tests. When the script runs dry it returns the configured default
/// (DONE unless overridden). Every request is recorded for inspection.
pub struct FixtureNavigator {
    script: Mutex<VecDeque<Result<ActionDecision, NavigatorError>>>,
    default_decision: ActionDecision,
    requests: Mutex<Vec<(Tier, EscalationReason, String)>>,
    delay: Mutex<Option<Duration>>,
}

impl FixtureNavigator {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_decision: ActionDecision::done(1.0, "fixture exhausted"),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    /// Simulate inference latency on every decide call
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Remove the configured latency
    pub fn clear_delay(&self) {
        *self.delay.lock().unwrap() = None;
    }

    /// Drop any remaining scripted decisions
    pub fn clear_script(&self) {
        self.script.lock().unwrap().clear();
    }

    /// Queue the next decision
    pub fn push(&self, decision: ActionDecision) {
        self.script.lock().unwrap().push_back(Ok(decision));
    }

    /// Queue an error response
    pub fn push_error(&self, error: NavigatorError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Set the decision returned once the script is exhausted
    pub fn set_default(&mut self, decision: ActionDecision) {
        self.default_decision = decision;
    }

    /// Requests seen so far: (tier, escalation, current url)
    pub fn requests(&self) -> Vec<(Tier, EscalationReason, String)> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of decide calls served
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for FixtureNavigator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Navigator for FixtureNavigator {
    async fn decide(&self, request: DecideRequest) -> Result<ActionDecision, NavigatorError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().unwrap().push((
            request.tier,
            request.escalation,
            request.observation.current_url.clone(),
        ));
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.default_decision.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{StructuredTreeCapture, StubPage};

    fn observation(url: &str) -> Observation {
        let capture: StructuredTreeCapture = StubPage::simple(url, 3).capture;
        Observation::structured(capture)
    }

    #[tokio::test]
    async fn test_fixture_plays_script_in_order() {
        let fixture = FixtureNavigator::new();
        fixture.push(ActionDecision::click(1.0, 2.0, 0.9, "first"));
        fixture.push(ActionDecision::done(1.0, "second"));

        let first = fixture
            .decide(DecideRequest::new("intent", observation("https://a.test/"), Tier::Structured))
            .await
            .unwrap();
        assert_eq!(first.reasoning, "first");

        let second = fixture
            .decide(DecideRequest::new("intent", observation("https://a.test/"), Tier::Structured))
            .await
            .unwrap();
        assert_eq!(second.reasoning, "second");

        // Exhausted: default DONE
        let third = fixture
            .decide(DecideRequest::new("intent", observation("https://a.test/"), Tier::Structured))
            .await
            .unwrap();
        assert_eq!(third.kind, super::super::ActionKind::Done);
    }

    #[tokio::test]
    async fn test_fixture_records_requests() {
        let fixture = FixtureNavigator::new();
        let request = DecideRequest::new("intent", observation("https://a.test/"), Tier::Visual)
            .with_escalation(EscalationReason::LowConfidence);
        fixture.decide(request).await.unwrap();

        let requests = fixture.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Tier::Visual);
        assert_eq!(requests[0].1, EscalationReason::LowConfidence);
        assert_eq!(requests[0].2, "https://a.test/");
    }

    #[tokio::test]
    async fn test_fixture_serves_errors() {
        let fixture = FixtureNavigator::new();
        fixture.push_error(NavigatorError::Malformed("not json".to_string()));

        let result = fixture
            .decide(DecideRequest::new("intent", observation("https://a.test/"), Tier::Structured))
            .await;
        assert!(matches!(result, Err(NavigatorError::Malformed(_))));
    }

    #[test]
    fn test_error_retryability() {
        assert!(
            NavigatorError::RateLimited {
                retry_after: Duration::from_secs(30)
            }
            .is_retryable()
        );
        assert!(
            NavigatorError::Api {
                status: 503,
                message: "unavailable".to_string()
            }
            .is_retryable()
        );
        assert!(
            !NavigatorError::Api {
                status: 400,
                message: "bad request".to_string()
            }
            .is_retryable()
        );
        assert!(NavigatorError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(!NavigatorError::Malformed("junk".to_string()).is_retryable());
        assert!(NavigatorError::Malformed("junk".to_string()).is_malformed());
    }

    #[test]
    fn test_decide_request_builders() {
        let request = DecideRequest::new("intent", observation("https://a.test/"), Tier::Structured)
            .with_escalation(EscalationReason::NoProgress)
            .with_correction("previous junk");
        assert_eq!(request.escalation, EscalationReason::NoProgress);
        assert_eq!(request.correction.as_deref(), Some("previous junk"));
    }
}
