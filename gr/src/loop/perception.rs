//! Page assessment, perception reuse, and progress tracking

use crate::session::{ActionOutcome, StructuredTreeCapture};

/// Classification of a captured page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAssessment {
    /// Interactive index is large enough, page is load-complete, and
    /// visual content is present
    pub structured_sufficient: bool,

    /// Structured source under-describes a loaded, visible page;
    /// escalation-worthy
    pub structured_deficient: bool,
}

impl PageAssessment {
    pub fn assess(capture: &StructuredTreeCapture, min_interactive: usize) -> Self {
        let loaded_and_visible = capture.load_complete && capture.visible_content;
        Self {
            structured_sufficient: capture.interactive_index.len() >= min_interactive && loaded_and_visible,
            structured_deficient: capture.deficiency.any() && loaded_and_visible,
        }
    }
}

/// Cached prior perception with staleness tracking
///
/// Staleness triggers (exhaustive): initial step, navigation observed,
/// url changed, significant DOM mutation since last perceive, scroll
/// action just executed.
pub struct PerceptionCache {
    capture: Option<StructuredTreeCapture>,
    stale: bool,
}

impl PerceptionCache {
    /// Starts stale: the initial step always captures
    pub fn new() -> Self {
        Self {
            capture: None,
            stale: true,
        }
    }

    /// Store a fresh capture
    pub fn store(&mut self, capture: StructuredTreeCapture) {
        self.capture = Some(capture);
        self.stale = false;
    }

    /// Reusable prior capture for this url, when not stale
    pub fn reuse(&self, url: &str) -> Option<&StructuredTreeCapture> {
        if self.stale {
            return None;
        }
        self.capture.as_ref().filter(|c| c.url == url)
    }

    /// Force a refetch on the next perceive
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Apply staleness rules after an executed action
    pub fn after_action(&mut self, outcome: &ActionOutcome, url_changed: bool, was_scroll: bool) {
        if outcome.navigation_observed || url_changed || outcome.significant_mutation() || was_scroll {
            self.stale = true;
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

impl Default for PerceptionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding no-progress detector over recent steps
pub struct ProgressTracker {
    recent: Vec<bool>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self { recent: Vec::new() }
    }

    /// Record whether the last step made observable progress
    pub fn record(&mut self, progressed: bool) {
        self.recent.push(progressed);
    }

    /// True when the previous `window` steps all made no progress
    pub fn stalled_for(&self, window: usize) -> bool {
        self.recent.len() >= window && self.recent.iter().rev().take(window).all(|p| !p)
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StubPage;

    #[test]
    fn test_assessment_sufficient() {
        let capture = StubPage::simple("https://a.test/", 5).capture;
        let assessment = PageAssessment::assess(&capture, 3);
        assert!(assessment.structured_sufficient);
        assert!(!assessment.structured_deficient);
    }

    #[test]
    fn test_assessment_too_few_interactive() {
        let capture = StubPage::simple("https://a.test/", 1).capture;
        let assessment = PageAssessment::assess(&capture, 3);
        assert!(!assessment.structured_sufficient);
    }

    #[test]
    fn test_assessment_deficient_requires_loaded_visible() {
        let capture = StubPage::deficient("https://a.test/").capture;
        let assessment = PageAssessment::assess(&capture, 3);
        assert!(assessment.structured_deficient);

        // A still-loading deficient page is not escalation-worthy yet
        let mut loading = StubPage::deficient("https://a.test/").capture;
        loading.load_complete = false;
        let assessment = PageAssessment::assess(&loading, 3);
        assert!(!assessment.structured_deficient);
    }

    #[test]
    fn test_perception_cache_initially_stale() {
        let cache = PerceptionCache::new();
        assert!(cache.is_stale());
        assert!(cache.reuse("https://a.test/").is_none());
    }

    #[test]
    fn test_perception_cache_reuse_same_url_only() {
        let mut cache = PerceptionCache::new();
        cache.store(StubPage::simple("https://a.test/", 3).capture);

        assert!(cache.reuse("https://a.test/").is_some());
        assert!(cache.reuse("https://b.test/").is_none());
    }

    #[test]
    fn test_quiet_action_keeps_cache_fresh() {
        let mut cache = PerceptionCache::new();
        cache.store(StubPage::simple("https://a.test/", 3).capture);

        let outcome = ActionOutcome::quiet("https://a.test/");
        cache.after_action(&outcome, false, false);
        assert!(!cache.is_stale());
    }

    #[test]
    fn test_staleness_triggers() {
        let base = StubPage::simple("https://a.test/", 3).capture;

        // Navigation observed
        let mut cache = PerceptionCache::new();
        cache.store(base.clone());
        let mut outcome = ActionOutcome::quiet("https://b.test/");
        outcome.navigation_observed = true;
        cache.after_action(&outcome, true, false);
        assert!(cache.is_stale());

        // Significant mutation
        let mut cache = PerceptionCache::new();
        cache.store(base.clone());
        let mut outcome = ActionOutcome::quiet("https://a.test/");
        outcome.mutations.added_nodes = 4;
        cache.after_action(&outcome, false, false);
        assert!(cache.is_stale());

        // Scroll just executed
        let mut cache = PerceptionCache::new();
        cache.store(base.clone());
        cache.after_action(&ActionOutcome::quiet("https://a.test/"), false, true);
        assert!(cache.is_stale());

        // Url changed without a navigation event
        let mut cache = PerceptionCache::new();
        cache.store(base);
        cache.after_action(&ActionOutcome::quiet("https://a.test/#next"), true, false);
        assert!(cache.is_stale());
    }

    #[test]
    fn test_progress_tracker() {
        let mut tracker = ProgressTracker::new();
        assert!(!tracker.stalled_for(2));

        tracker.record(true);
        tracker.record(false);
        assert!(!tracker.stalled_for(2));

        tracker.record(false);
        assert!(tracker.stalled_for(2));

        tracker.record(true);
        assert!(!tracker.stalled_for(2));
    }
}
