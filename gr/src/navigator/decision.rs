//! Action decisions returned by the navigator

use serde::{Deserialize, Serialize};

use crate::domain::{ErrorDetail, ErrorKind};

/// Kind of action to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Click,
    Type,
    PressKey,
    Scroll,
    Wait,
    Extract,
    Done,
    Failed,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Click => write!(f, "CLICK"),
            Self::Type => write!(f, "TYPE"),
            Self::PressKey => write!(f, "PRESS_KEY"),
            Self::Scroll => write!(f, "SCROLL"),
            Self::Wait => write!(f, "WAIT"),
            Self::Extract => write!(f, "EXTRACT"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Special keys the navigator may press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialKey {
    Enter,
    Tab,
    Escape,
}

/// Viewport coordinates input is dispatched at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPoint {
    pub x: f64,
    pub y: f64,
}

/// One navigator decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecision {
    pub kind: ActionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetPoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<SpecialKey>,

    /// Confidence in [0, 1]
    pub confidence: f64,

    /// Why the navigator chose this action
    pub reasoning: String,
}

impl ActionDecision {
    pub fn click(x: f64, y: f64, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Click,
            target: Some(TargetPoint { x, y }),
            text: None,
            key: None,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    pub fn type_text(text: impl Into<String>, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Type,
            target: None,
            text: Some(text.into()),
            key: None,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    pub fn press_key(key: SpecialKey, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::PressKey,
            target: None,
            text: None,
            key: Some(key),
            confidence,
            reasoning: reasoning.into(),
        }
    }

    pub fn scroll(confidence: f64, reasoning: impl Into<String>) -> Self {
        Self::bare(ActionKind::Scroll, confidence, reasoning)
    }

    pub fn wait(confidence: f64, reasoning: impl Into<String>) -> Self {
        Self::bare(ActionKind::Wait, confidence, reasoning)
    }

    pub fn extract(confidence: f64, reasoning: impl Into<String>) -> Self {
        Self::bare(ActionKind::Extract, confidence, reasoning)
    }

    pub fn done(confidence: f64, reasoning: impl Into<String>) -> Self {
        Self::bare(ActionKind::Done, confidence, reasoning)
    }

    pub fn failed(reasoning: impl Into<String>) -> Self {
        Self::bare(ActionKind::Failed, 1.0, reasoning)
    }

    fn bare(kind: ActionKind, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            kind,
            target: None,
            text: None,
            key: None,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    /// Enforce per-kind invariants before execution
    ///
    /// CLICK requires a target; TYPE requires non-empty text; PRESS_KEY
    /// requires a key; every other kind must not carry a key. Confidence
    /// must be within [0, 1].
    pub fn validate(&self) -> Result<(), ErrorDetail> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(self.invalid(format!("confidence {} outside [0, 1]", self.confidence)));
        }
        match self.kind {
            ActionKind::Click => {
                if self.target.is_none() {
                    return Err(self.invalid("CLICK requires a target"));
                }
            }
            ActionKind::Type => {
                if self.text.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(self.invalid("TYPE requires non-empty text"));
                }
            }
            ActionKind::PressKey => {
                if self.key.is_none() {
                    return Err(self.invalid("PRESS_KEY requires a key"));
                }
            }
            _ => {}
        }
        if self.kind != ActionKind::PressKey && self.key.is_some() {
            return Err(self.invalid(format!("{} must not carry a key", self.kind)));
        }
        Ok(())
    }

    fn invalid(&self, message: impl Into<String>) -> ErrorDetail {
        ErrorDetail::new(ErrorKind::Validation, message)
    }

    /// Short rendering for status snapshots and history lines
    pub fn render(&self) -> String {
        match self.kind {
            ActionKind::Click => match self.target {
                Some(t) => format!("CLICK ({:.0}, {:.0})", t.x, t.y),
                None => "CLICK".to_string(),
            },
            ActionKind::Type => format!("TYPE \"{}\"", self.text.as_deref().unwrap_or("")),
            ActionKind::PressKey => format!("PRESS_KEY {:?}", self.key.unwrap_or(SpecialKey::Enter)),
            other => other.to_string(),
        }
    }

    /// Whether this decision ends the loop
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ActionKind::Done | ActionKind::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_requires_target() {
        let mut decision = ActionDecision::click(10.0, 20.0, 0.9, "ok");
        assert!(decision.validate().is_ok());

        decision.target = None;
        let err = decision.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("target"));
    }

    #[test]
    fn test_type_requires_nonempty_text() {
        assert!(ActionDecision::type_text("hello", 0.8, "fill the box").validate().is_ok());

        let mut decision = ActionDecision::type_text("   ", 0.8, "fill the box");
        assert!(decision.validate().is_err());

        decision.text = None;
        assert!(decision.validate().is_err());
    }

    #[test]
    fn test_press_key_requires_key() {
        assert!(ActionDecision::press_key(SpecialKey::Enter, 0.9, "submit").validate().is_ok());

        let mut decision = ActionDecision::press_key(SpecialKey::Tab, 0.9, "next field");
        decision.key = None;
        assert!(decision.validate().is_err());
    }

    #[test]
    fn test_non_press_key_kinds_reject_keys() {
        let mut decision = ActionDecision::scroll(0.9, "scroll down");
        assert!(decision.validate().is_ok());

        decision.key = Some(SpecialKey::Escape);
        let err = decision.validate().unwrap_err();
        assert!(err.message.contains("must not carry a key"));
    }

    #[test]
    fn test_confidence_bounds() {
        let mut decision = ActionDecision::done(1.0, "finished");
        assert!(decision.validate().is_ok());

        decision.confidence = 1.2;
        assert!(decision.validate().is_err());

        decision.confidence = -0.1;
        assert!(decision.validate().is_err());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(ActionDecision::done(1.0, "x").is_terminal());
        assert!(ActionDecision::failed("x").is_terminal());
        assert!(!ActionDecision::wait(0.5, "x").is_terminal());
    }

    #[test]
    fn test_render() {
        assert_eq!(ActionDecision::click(119.6, 80.2, 0.9, "x").render(), "CLICK (120, 80)");
        assert_eq!(ActionDecision::type_text("abc", 0.9, "x").render(), "TYPE \"abc\"");
        assert_eq!(ActionDecision::done(1.0, "x").render(), "DONE");
    }

    #[test]
    fn test_wire_format() {
        let decision = ActionDecision::press_key(SpecialKey::Enter, 0.88, "submit the form");
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["kind"], "PRESS_KEY");
        assert_eq!(json["key"], "Enter");
        assert!(json.get("target").is_none());

        let back: ActionDecision = serde_json::from_value(json).unwrap();
        assert_eq!(back, decision);
    }
}
