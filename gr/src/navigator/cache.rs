//! Tier 1 decision cache
//!
//! Short-circuits a structured-tier navigator call when the observation
//! footprint on the same url has not changed within the TTL. Invalidated
//! on navigation, url change, or significant mutation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::client::{EscalationReason, Tier};
use super::decision::ActionDecision;

#[derive(Debug, Clone)]
struct CacheEntry {
    decision: ActionDecision,
    footprint: u64,
    inserted_at: Instant,
}

/// Per-url decision cache keyed by (url, tier, escalation reason)
pub struct DecisionCache {
    ttl: Duration,
    entries: HashMap<(String, Tier, EscalationReason), CacheEntry>,
    hits: u64,
    misses: u64,
}

impl DecisionCache {
    /// Default TTL for cached decisions
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a fresh cached decision for this observation footprint
    pub fn get(
        &mut self,
        url: &str,
        tier: Tier,
        escalation: EscalationReason,
        footprint: u64,
    ) -> Option<ActionDecision> {
        let key = (url.to_string(), tier, escalation);
        let fresh = match self.entries.get(&key) {
            Some(entry) => entry.footprint == footprint && entry.inserted_at.elapsed() < self.ttl,
            None => false,
        };
        if fresh {
            self.hits += 1;
            self.entries.get(&key).map(|e| e.decision.clone())
        } else {
            self.misses += 1;
            self.entries.remove(&key);
            None
        }
    }

    /// Store a decision for this footprint
    pub fn insert(
        &mut self,
        url: &str,
        tier: Tier,
        escalation: EscalationReason,
        footprint: u64,
        decision: ActionDecision,
    ) {
        self.entries.insert(
            (url.to_string(), tier, escalation),
            CacheEntry {
                decision,
                footprint,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry for a url (navigation or significant mutation)
    pub fn invalidate_url(&mut self, url: &str) {
        self.entries.retain(|(entry_url, _, _), _| entry_url != url);
    }

    /// Drop everything (navigation to a new document)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) counters for loop stats
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}
