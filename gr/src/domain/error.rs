//! Error taxonomy for task execution
//!
//! Every failure surfaced to the status stream is condensed into an
//! [`ErrorDetail`]: a kind, an optional status code and url, the message,
//! and a retryable flag. When a failure arrives as bare text (capability
//! boundaries, navigator output), [`classify_message`] assigns a kind by
//! message pattern.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Error kind taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Protocol,
    Runtime,
    Timeout,
    Validation,
    State,
    #[default]
    Unknown,
}

impl ErrorKind {
    /// Whether errors of this kind are retryable by default
    ///
    /// Runtime and unknown errors are only retried when a crash signal
    /// accompanies them; that check lives in the scheduler.
    pub fn retryable_by_default(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Protocol)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Protocol => write!(f, "protocol"),
            Self::Runtime => write!(f, "runtime"),
            Self::Timeout => write!(f, "timeout"),
            Self::Validation => write!(f, "validation"),
            Self::State => write!(f, "state"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Structured failure detail attached to tasks and status events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error kind
    pub kind: ErrorKind,

    /// HTTP-ish status code, when one was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// URL associated with the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Human-readable message
    pub message: String,

    /// Whether a retry could plausibly succeed
    pub retryable: bool,

    /// Step number in the perception-action loop, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl ErrorDetail {
    /// Create an error detail with the default retryable policy for its kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            url: None,
            message: message.into(),
            retryable: kind.retryable_by_default(),
            step: None,
        }
    }

    /// Classify bare message text into a detail
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(classify_message(&message), message)
    }

    /// Attach the loop step at which the failure occurred
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    /// Attach the url the session was on
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Attach an observed status code
    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Override the retryable flag
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

fn patterns() -> &'static [(ErrorKind, Regex)] {
    static PATTERNS: OnceLock<Vec<(ErrorKind, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                ErrorKind::Timeout,
                Regex::new(r"(?i)\b(timed? ?out|deadline exceeded)\b").unwrap(),
            ),
            (
                ErrorKind::Network,
                Regex::new(r"(?i)\b(net::|dns|connection (refused|reset|closed)|ECONNREFUSED|ERR_NAME_NOT_RESOLVED|socket hang ?up|fetch failed)\b").unwrap(),
            ),
            (
                ErrorKind::Protocol,
                Regex::new(r"(?i)\b(protocol error|session closed|target closed|page (has been )?closed|renderer crash(ed)?|browser (has )?disconnected)\b").unwrap(),
            ),
            (
                ErrorKind::Validation,
                Regex::new(r"(?i)\b(invalid|malformed|schema|missing required|parse error|validation)\b").unwrap(),
            ),
            (
                ErrorKind::State,
                Regex::new(r"(?i)\b(illegal transition|invalid state|not in state)\b").unwrap(),
            ),
            (
                ErrorKind::Runtime,
                Regex::new(r"(?i)\b(panic|unwrap|index out of|null|undefined is not)\b").unwrap(),
            ),
        ]
    })
}

/// Classify a message into an error kind by pattern
///
/// First matching pattern wins; timeout is checked before network so
/// "connection timed out" lands on timeout.
pub fn classify_message(message: &str) -> ErrorKind {
    for (kind, pattern) in patterns() {
        if pattern.is_match(message) {
            return *kind;
        }
    }
    ErrorKind::Unknown
}
