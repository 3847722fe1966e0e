//! Heuristic decomposition of intents into verifiable subtask plans
//!
//! Splits the input into clauses on connectors ("then", "and then",
//! "next", "finally", "and") and infers each clause's verification from
//! its verb family. Intents implying fewer than three steps collapse to a
//! single relaxed subtask.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::domain::{Classification, DecompositionPlan, IntentKind, Subtask, VerificationType};

use super::classifier::normalize_url;

/// Decomposer tuning
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Step estimate at or above which the plan is split into clauses
    pub min_steps_for_decomposition: u32,

    /// Store a fallback plan alongside the primary
    pub fallback_enabled: bool,

    /// Whether switching to the fallback consumes a scheduler retry
    pub fallback_counts_against_retries: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_steps_for_decomposition: 3,
            fallback_enabled: true,
            fallback_counts_against_retries: false,
        }
    }
}

fn connector_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\s*(?:,\s*)?\b(and then|then|next|finally|and)\b\s*").unwrap())
}

fn extract_verbs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(extract|collect|capture|return)\b").unwrap())
}

fn navigate_verbs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(open|navigate|visit|go)\b").unwrap())
}

fn click_verbs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(click|select|choose)\b").unwrap())
}

fn sensitive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(captcha|2fa|two.factor|one.time code|password|credit card|card number|cvv|ssn|social security)\b")
            .unwrap()
    })
}

fn comparison_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(compare|vs\.?|versus|difference between)\b").unwrap())
}

/// Splits intents into plans of verifiable subtasks
pub struct Decomposer {
    config: PlannerConfig,
}

impl Decomposer {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Estimate the step count implied by the intent text
    ///
    /// Base is the clause count; comparison language and research intents
    /// boost the estimate because they imply per-source extraction plus a
    /// consolidation pass.
    pub fn estimate_steps(&self, intent: &str, classification: &Classification) -> u32 {
        let clauses = split_clauses(intent);
        let mut estimate = clauses.len() as u32;

        if comparison_pattern().is_match(intent) {
            estimate += 1;
        }
        if classification.intent == IntentKind::Research && classification.confidence >= 0.7 {
            // Multi-source research implies visit, extract, consolidate
            estimate = estimate.max(3);
        }
        estimate.max(1)
    }

    /// Build the plan for an intent
    pub fn decompose(&self, intent: &str, classification: &Classification) -> DecompositionPlan {
        let estimate = self.estimate_steps(intent, classification);

        if estimate < self.config.min_steps_for_decomposition {
            debug!(intent, estimate, "below decomposition threshold, single subtask");
            let subtask = self.build_subtask(1, intent).with_condition("action completed without error");
            let mut single = Subtask {
                verification_type: VerificationType::ActionConfirmed,
                ..subtask
            };
            if sensitive_pattern().is_match(intent) {
                single.verification_type = VerificationType::HumanReview;
            }
            return DecompositionPlan::new(intent, vec![single], estimate);
        }

        let clauses = split_clauses(intent);
        let mut subtasks: Vec<Subtask> = clauses
            .iter()
            .enumerate()
            .map(|(i, clause)| self.build_subtask(i + 1, clause))
            .collect();

        // Pad synthesized steps up to the estimate so comparison intents
        // carry their extraction and consolidation phases explicitly
        let mut next_index = subtasks.len() + 1;
        while (subtasks.len() as u32) < estimate {
            let (subtask_intent, verification) = if subtasks.iter().all(|s| s.verification_type != VerificationType::DataExtracted)
            {
                ("extract the relevant data from each source", VerificationType::DataExtracted)
            } else {
                ("consolidate and verify the collected results", VerificationType::ActionConfirmed)
            };
            subtasks.push(
                Subtask::new(format!("s{}", next_index), subtask_intent, verification)
                    .with_condition(subtask_intent),
            );
            next_index += 1;
        }

        // Sequential chain: each subtask depends on its predecessor
        for i in 1..subtasks.len() {
            let prev = subtasks[i - 1].id.clone();
            subtasks[i].depends_on.push(prev);
        }

        let mut plan = DecompositionPlan::new(intent, subtasks, estimate);
        if self.config.fallback_enabled {
            let fallback = vec![
                Subtask::new("f1", format!("retry via an alternate route: {}", intent), VerificationType::ActionConfirmed)
                    .with_condition("alternate route completed"),
            ];
            plan = plan.with_fallback(fallback);
        }
        debug!(intent, steps = plan.len(), "decomposed");
        plan
    }

    fn build_subtask(&self, index: usize, clause: &str) -> Subtask {
        let verification = if sensitive_pattern().is_match(clause) {
            VerificationType::HumanReview
        } else if extract_verbs().is_match(clause) {
            VerificationType::DataExtracted
        } else if navigate_verbs().is_match(clause) {
            VerificationType::UrlMatches
        } else if click_verbs().is_match(clause) {
            VerificationType::ElementPresent
        } else {
            VerificationType::ActionConfirmed
        };

        let mut subtask = Subtask::new(format!("s{}", index), clause.trim(), verification);
        if let Some(url) = clause.split_whitespace().find_map(normalize_url) {
            subtask = subtask.with_start_url(url);
        }
        subtask
    }
}

impl Default for Decomposer {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

/// Split an intent into clauses on connector words
fn split_clauses(intent: &str) -> Vec<String> {
    connector_pattern()
        .split(intent)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
