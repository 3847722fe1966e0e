//! Intent classification heuristics

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{Classification, ClassificationSource, IntentKind, Mode};

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?i)(https?://)?([a-z0-9][a-z0-9-]*\.)+[a-z]{2,}(:\d+)?(/\S*)?$").unwrap()
    })
}

fn research_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(compare|best|cheapest|reviews?|vs\.?|versus|research|difference between|find out|across (multiple|several))\b").unwrap()
    })
}

fn transact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(buy|purchase|order|book|reserve|sign up|register|check ?out|add to cart|fill (in|out)|submit|log ?in|apply for|cancel my)\b").unwrap()
    })
}

fn generate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(chart|graph|plot|diagram|dashboard|visuali[sz]e|visuali[sz]ation|infographic|mock ?up)\b").unwrap()
    })
}

/// Whether the input reads as a bare URL or domain
pub fn looks_like_url(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.contains(' ') && url_pattern().is_match(trimmed)
}

/// Canonical form of URL-like input: scheme defaulted, bare domains get a
/// trailing slash
pub fn normalize_url(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !looks_like_url(trimmed) {
        return None;
    }
    let with_scheme = if trimmed.to_lowercase().starts_with("http://") || trimmed.to_lowercase().starts_with("https://")
    {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    // Bare origin gets a trailing slash
    let after_scheme = &with_scheme[with_scheme.find("://").unwrap() + 3..];
    if after_scheme.contains('/') {
        Some(with_scheme)
    } else {
        Some(format!("{}/", with_scheme))
    }
}

/// Classify an intent string, honoring an explicit mode override
///
/// A non-AUTO mode takes strict precedence and is recorded as the
/// classification source with full confidence. Otherwise: URL-like input
/// navigates, visualization language generates, strong form verbs
/// transact, comparison language researches, and anything else defaults
/// to research.
pub fn classify_intent(text: &str, mode: Mode) -> Classification {
    if let Some(intent) = mode.intent_override() {
        return Classification {
            intent,
            source: ClassificationSource::ModeOverride,
            confidence: 1.0,
            reason: format!("explicit {:?} mode", mode).to_uppercase(),
        };
    }

    if looks_like_url(text) {
        return Classification {
            intent: IntentKind::Navigate,
            source: ClassificationSource::UrlDetection,
            confidence: 0.97,
            reason: "input is a bare URL or domain".to_string(),
        };
    }

    if generate_pattern().is_match(text) {
        return Classification {
            intent: IntentKind::Generate,
            source: ClassificationSource::KeywordHeuristic,
            confidence: 0.82,
            reason: "visualization language".to_string(),
        };
    }

    if transact_pattern().is_match(text) {
        return Classification {
            intent: IntentKind::Transact,
            source: ClassificationSource::KeywordHeuristic,
            confidence: 0.86,
            reason: "form-completion verbs".to_string(),
        };
    }

    if research_pattern().is_match(text) {
        return Classification {
            intent: IntentKind::Research,
            source: ClassificationSource::KeywordHeuristic,
            confidence: 0.88,
            reason: "comparison or multi-site language".to_string(),
        };
    }

    Classification {
        intent: IntentKind::Research,
        source: ClassificationSource::DefaultFallback,
        confidence: 0.6,
        reason: "no strong signal; research by default".to_string(),
    }
}
