//! SessionClient trait definition and session errors

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::InterceptionMode;
use crate::domain::{ErrorDetail, ErrorKind};
use crate::navigator::ActionDecision;

use super::types::{
    ActionOutcome, NavigationOutcome, ResourceSample, StructuredTreeCapture, TreeCaptureOptions, ViewportImage,
};

/// Errors surfaced by a session capability call
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("session closed")]
    Closed,

    #[error("renderer crashed")]
    Crashed,
}

impl SessionError {
    /// Map to the task error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Navigation(_) | Self::Network(_) => ErrorKind::Network,
            Self::Protocol(_) | Self::Closed | Self::Crashed => ErrorKind::Protocol,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Condense into an error detail
    ///
    /// A dead session cannot be retried within the loop; the scheduler's
    /// crash classification decides whether the attempt retries.
    pub fn to_detail(&self) -> ErrorDetail {
        let detail = ErrorDetail::new(self.kind(), self.to_string());
        match self {
            Self::Closed | Self::Crashed => detail.with_retryable(false),
            _ => detail,
        }
    }
}

/// One-shot crash flag shared between a session and its observers
///
/// The session layer fires it when the renderer dies; the scheduler reads
/// it after each attempt. Firing is idempotent and reported once.
#[derive(Debug, Clone, Default)]
pub struct CrashSignal {
    fired: Arc<AtomicBool>,
}

impl CrashSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal; returns true only for the first call
    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }

    /// Whether a crash has been observed
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Capability contract for driving one isolated browser session
///
/// Implementations: a real protocol-backed client, a recorded-fixture
/// player, and [`super::StubSessionClient`] for tests. Injected via
/// constructor everywhere; the core never holds a process-wide singleton.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Navigate the session, waiting up to `timeout` for load-complete
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationOutcome, SessionError>;

    /// Capture the pruned semantic structure and interactive index
    ///
    /// Truncation under the char budget must retain interactive nodes in
    /// preference to decorative ones.
    async fn capture_structured_tree(&self, opts: &TreeCaptureOptions) -> Result<StructuredTreeCapture, SessionError>;

    /// Capture the current viewport as an image
    async fn capture_viewport_image(&self) -> Result<ViewportImage, SessionError>;

    /// Dispatch the decision's input events, then wait at most
    /// `settle_timeout` for navigation-complete or a significant mutation
    async fn execute_action(
        &self,
        decision: &ActionDecision,
        settle_timeout: Duration,
    ) -> Result<ActionOutcome, SessionError>;

    /// Sample current resource usage (read-only, safe alongside actions)
    async fn sample_resource_metrics(&self) -> Result<ResourceSample, SessionError>;

    /// URL the session is currently on
    async fn current_url(&self) -> String;

    /// Crash observation flag for this session
    fn crash_signal(&self) -> CrashSignal;

    /// Adjust the request interception posture (optional capability)
    async fn set_interception_mode(&self, _mode: InterceptionMode) -> Result<(), SessionError> {
        Ok(())
    }

    /// Warm the cache for a url about to be clicked (optional capability,
    /// never blocks action execution)
    async fn prefetch(&self, _url: &str) -> Result<(), SessionError> {
        Ok(())
    }

    /// Tear the session down, clearing partition storage
    async fn close(&self) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_signal_fires_once() {
        let signal = CrashSignal::new();
        assert!(!signal.fired());
        assert!(signal.fire());
        assert!(signal.fired());
        // Second fire is not reported again
        assert!(!signal.fire());
        assert!(signal.fired());
    }

    #[test]
    fn test_crash_signal_shared_across_clones() {
        let signal = CrashSignal::new();
        let observer = signal.clone();
        signal.fire();
        assert!(observer.fired());
    }

    #[test]
    fn test_session_error_kinds() {
        assert_eq!(SessionError::Network("dns".to_string()).kind(), ErrorKind::Network);
        assert_eq!(SessionError::Timeout(Duration::from_secs(5)).kind(), ErrorKind::Timeout);
        assert_eq!(SessionError::Closed.kind(), ErrorKind::Protocol);
        assert_eq!(SessionError::Crashed.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_session_error_detail_retryable() {
        // Protocol-kind errors are retryable in general
        let detail = SessionError::Protocol("flaky target".to_string()).to_detail();
        assert_eq!(detail.kind, ErrorKind::Protocol);
        assert!(detail.retryable);

        // A crashed or closed session is not step-retryable
        assert!(!SessionError::Crashed.to_detail().retryable);
        assert!(!SessionError::Closed.to_detail().retryable);
    }
}
