//! Loop configuration

use std::time::Duration;

use crate::config::Config;
use crate::session::TreeCaptureOptions;

/// Tuning for one perception-action loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Hard step cap; hitting it is a terminal max_steps outcome
    pub max_steps: u32,

    /// Tier 1 confidence below this escalates to the visual tier
    pub confidence_threshold: f64,

    /// Settle window after dispatching input
    pub settle_timeout: Duration,

    /// Navigation timeout for the start url
    pub navigation_timeout: Duration,

    /// TTL for the structured decision cache
    pub decision_cache_ttl: Duration,

    /// Structured tree capture options
    pub tree_options: TreeCaptureOptions,

    /// Interactive index size at or above which a page can count as
    /// structured-sufficient
    pub min_interactive_for_sufficient: usize,

    /// Dispatch a non-blocking prefetch for link clicks
    pub prefetch_enabled: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            confidence_threshold: 0.75,
            settle_timeout: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(30),
            decision_cache_ttl: Duration::from_secs(60),
            tree_options: TreeCaptureOptions::default(),
            min_interactive_for_sufficient: 3,
            prefetch_enabled: true,
        }
    }
}

impl LoopConfig {
    /// Derive loop tuning from the resolved runtime config
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_steps: config.execution.max_steps,
            confidence_threshold: config.execution.confidence_threshold,
            settle_timeout: Duration::from_millis(config.execution.settle_timeout_ms),
            navigation_timeout: Duration::from_millis(config.execution.navigation_timeout_ms),
            decision_cache_ttl: Duration::from_millis(config.execution.decision_cache_ttl_ms),
            tree_options: TreeCaptureOptions {
                compact_encoding: config.network.compact_tree_encoding,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Override the step cap for one task
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.confidence_threshold, 0.75);
        assert_eq!(config.decision_cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_from_config_carries_compact_encoding() {
        let mut runtime = Config::default();
        runtime.network.compact_tree_encoding = true;
        runtime.execution.max_steps = 7;

        let config = LoopConfig::from_config(&runtime);
        assert!(config.tree_options.compact_encoding);
        assert_eq!(config.max_steps, 7);
    }

    #[test]
    fn test_with_max_steps() {
        let config = LoopConfig::default().with_max_steps(3);
        assert_eq!(config.max_steps, 3);
    }
}
