//! Ghostrun configuration types and loading
//!
//! Configuration is resolved once at startup: YAML file (explicit path,
//! then project-local, then user config dir), then environment variable
//! overrides. The resulting [`Config`] is immutable and passed explicitly
//! to the orchestrator; no component reads the process environment later.

use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main Ghostrun configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ghost session pool sizing
    pub pool: PoolSettings,

    /// Navigator endpoint and model selection
    pub navigator: NavigatorSettings,

    /// Per-session resource budgets
    pub budgets: BudgetSettings,

    /// Perception-action loop tuning
    pub execution: ExecutionSettings,

    /// Request interception and HTTP cache posture
    pub network: NetworkSettings,
}

impl Config {
    /// Load configuration with fallback chain, then apply env overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .ghostrun.yml
        let local_config = PathBuf::from(".ghostrun.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/ghostrun/ghostrun.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ghostrun").join("ghostrun.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply recognized environment variables on top of file values
    fn apply_env(&mut self) -> Result<()> {
        if let Some(raw) = env_var("SESSION_COUNT") {
            let count: usize = raw
                .parse()
                .map_err(|_| eyre::eyre!("SESSION_COUNT must be an integer, got '{}'", raw))?;
            if count == 0 {
                bail!("SESSION_COUNT must be > 0");
            }
            self.pool.session_count = count;
        }

        if let Some(model) = env_var("NAVIGATOR_MODEL") {
            self.navigator.model = model;
        }
        if let Some(model) = env_var("NAVIGATOR_VISION_MODEL") {
            self.navigator.vision_model = model;
        }

        if let Some(raw) = env_var("REQUEST_INTERCEPTION_ENABLED") {
            self.network.interception_enabled = parse_bool("REQUEST_INTERCEPTION_ENABLED", &raw)?;
        }
        if let Some(raw) = env_var("REQUEST_INTERCEPTION_INITIAL_MODE") {
            self.network.interception_mode = raw
                .parse()
                .map_err(|e: String| eyre::eyre!("REQUEST_INTERCEPTION_INITIAL_MODE: {}", e))?;
        }

        if let Some(raw) = env_var("HTTP_CACHE_MODE") {
            self.network.http_cache_mode = raw.parse().map_err(|e: String| eyre::eyre!("HTTP_CACHE_MODE: {}", e))?;
        }
        if let Some(raw) = env_var("HTTP_CACHE_TTL_MS") {
            let ttl: u64 = raw
                .parse()
                .map_err(|_| eyre::eyre!("HTTP_CACHE_TTL_MS must be an integer, got '{}'", raw))?;
            self.network.http_cache_ttl_ms = ttl;
        }

        if let Some(raw) = env_var("USE_COMPACT_TREE_ENCODING") {
            self.network.compact_tree_encoding = parse_bool("USE_COMPACT_TREE_ENCODING", &raw)?;
        }

        Ok(())
    }

    /// Cross-field validation after file + env resolution
    fn validate(&self) -> Result<()> {
        if self.pool.session_count == 0 {
            bail!("pool.session-count must be > 0");
        }
        if self.pool.min_size > self.pool.session_count {
            bail!(
                "pool.min-size ({}) must not exceed pool.session-count ({})",
                self.pool.min_size,
                self.pool.session_count
            );
        }
        if self.network.http_cache_mode == HttpCacheMode::OverrideTtl && self.network.http_cache_ttl_ms == 0 {
            bail!("HTTP_CACHE_TTL_MS must be > 0 when HTTP_CACHE_MODE is override_ttl");
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} must be a boolean, got '{}'", name, other),
    }
}

/// Ghost session pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Desired pool size (max concurrent sessions)
    #[serde(rename = "session-count")]
    pub session_count: usize,

    /// Minimum warm sessions to keep available
    #[serde(rename = "min-size")]
    pub min_size: usize,

    /// Session warmup timeout in milliseconds
    #[serde(rename = "warmup-timeout-ms")]
    pub warmup_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            session_count: 6,
            min_size: 1,
            warmup_timeout_ms: 15_000,
        }
    }
}

/// Navigator endpoint and model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorSettings {
    /// Tier 1 (structured-only) model identifier
    pub model: String,

    /// Tier 2 (visual) model identifier
    #[serde(rename = "vision-model")]
    pub vision_model: String,

    /// Navigator service base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for NavigatorSettings {
    fn default() -> Self {
        Self {
            model: "navigator-structured-v1".to_string(),
            vision_model: "navigator-visual-v1".to_string(),
            base_url: "https://navigator.local".to_string(),
            api_key_env: "NAVIGATOR_API_KEY".to_string(),
            timeout_ms: 60_000,
        }
    }
}

/// Per-session resource budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    /// CPU budget as percent of one core
    #[serde(rename = "cpu-percent")]
    pub cpu_percent: f64,

    /// Memory budget in MB
    #[serde(rename = "memory-mb")]
    pub memory_mb: f64,

    /// Sampling interval in milliseconds
    #[serde(rename = "sample-interval-ms")]
    pub sample_interval_ms: u64,

    /// How long a budget must be continuously exceeded before a violation
    #[serde(rename = "violation-window-ms")]
    pub violation_window_ms: u64,

    /// Enforcement mode: warn_only or kill_tab
    pub mode: crate::monitor::BudgetMode,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_mb: 1024.0,
            sample_interval_ms: 1_000,
            violation_window_ms: 10_000,
            mode: crate::monitor::BudgetMode::WarnOnly,
        }
    }
}

impl BudgetSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn violation_window(&self) -> Duration {
        Duration::from_millis(self.violation_window_ms)
    }
}

/// Perception-action loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Hard step cap per task
    #[serde(rename = "max-steps")]
    pub max_steps: u32,

    /// Settle timeout after an action in milliseconds
    #[serde(rename = "settle-timeout-ms")]
    pub settle_timeout_ms: u64,

    /// Navigation timeout in milliseconds
    #[serde(rename = "navigation-timeout-ms")]
    pub navigation_timeout_ms: u64,

    /// Tier 1 decision cache TTL in milliseconds
    #[serde(rename = "decision-cache-ttl-ms")]
    pub decision_cache_ttl_ms: u64,

    /// Crash retries per task (attempts = retries + 1)
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Confidence below which Tier 2 escalation triggers
    #[serde(rename = "confidence-threshold")]
    pub confidence_threshold: f64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_steps: 20,
            settle_timeout_ms: 5_000,
            navigation_timeout_ms: 30_000,
            decision_cache_ttl_ms: 60_000,
            max_retries: 2,
            confidence_threshold: 0.75,
        }
    }
}

/// Request interception mode for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterceptionMode {
    #[default]
    AgentFast,
    VisualRender,
    Disabled,
}

impl std::str::FromStr for InterceptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agent_fast" => Ok(Self::AgentFast),
            "visual_render" => Ok(Self::VisualRender),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!(
                "unknown interception mode '{}' (expected agent_fast, visual_render, disabled)",
                other
            )),
        }
    }
}

/// HTTP cache posture for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HttpCacheMode {
    #[default]
    RespectHeaders,
    ForceRefresh,
    OverrideTtl,
}

impl std::str::FromStr for HttpCacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "respect_headers" => Ok(Self::RespectHeaders),
            "force_refresh" => Ok(Self::ForceRefresh),
            "override_ttl" => Ok(Self::OverrideTtl),
            other => Err(format!(
                "unknown http cache mode '{}' (expected respect_headers, force_refresh, override_ttl)",
                other
            )),
        }
    }
}

/// Request interception and HTTP cache posture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Whether request interception is enabled at session start
    #[serde(rename = "interception-enabled")]
    pub interception_enabled: bool,

    /// Initial interception mode
    #[serde(rename = "interception-mode")]
    pub interception_mode: InterceptionMode,

    /// HTTP cache mode
    #[serde(rename = "http-cache-mode")]
    pub http_cache_mode: HttpCacheMode,

    /// Cache TTL in ms, required > 0 for override_ttl
    #[serde(rename = "http-cache-ttl-ms")]
    pub http_cache_ttl_ms: u64,

    /// Use the compact structured tree encoder
    #[serde(rename = "compact-tree-encoding")]
    pub compact_tree_encoding: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            interception_enabled: true,
            interception_mode: InterceptionMode::AgentFast,
            http_cache_mode: HttpCacheMode::RespectHeaders,
            http_cache_ttl_ms: 0,
            compact_tree_encoding: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: &[&str] = &[
        "SESSION_COUNT",
        "NAVIGATOR_MODEL",
        "NAVIGATOR_VISION_MODEL",
        "REQUEST_INTERCEPTION_ENABLED",
        "REQUEST_INTERCEPTION_INITIAL_MODE",
        "HTTP_CACHE_MODE",
        "HTTP_CACHE_TTL_MS",
        "USE_COMPACT_TREE_ENCODING",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = Config::load(None).unwrap();

        assert_eq!(config.pool.session_count, 6);
        assert_eq!(config.execution.max_steps, 20);
        assert_eq!(config.budgets.violation_window_ms, 10_000);
        assert_eq!(config.network.interception_mode, InterceptionMode::AgentFast);
    }

    #[test]
    #[serial]
    fn test_session_count_env_override() {
        clear_env();
        unsafe { std::env::set_var("SESSION_COUNT", "12") };
        let config = Config::load(None).unwrap();
        assert_eq!(config.pool.session_count, 12);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_session_count_rejects_zero() {
        clear_env();
        unsafe { std::env::set_var("SESSION_COUNT", "0") };
        assert!(Config::load(None).is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_navigator_model_env_override() {
        clear_env();
        unsafe { std::env::set_var("NAVIGATOR_MODEL", "structured-x") };
        unsafe { std::env::set_var("NAVIGATOR_VISION_MODEL", "visual-y") };
        let config = Config::load(None).unwrap();
        assert_eq!(config.navigator.model, "structured-x");
        assert_eq!(config.navigator.vision_model, "visual-y");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_cache_override_ttl_requires_positive_ttl() {
        clear_env();
        unsafe { std::env::set_var("HTTP_CACHE_MODE", "override_ttl") };
        assert!(Config::load(None).is_err());

        unsafe { std::env::set_var("HTTP_CACHE_TTL_MS", "30000") };
        let config = Config::load(None).unwrap();
        assert_eq!(config.network.http_cache_mode, HttpCacheMode::OverrideTtl);
        assert_eq!(config.network.http_cache_ttl_ms, 30_000);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_interception_mode_parse() {
        clear_env();
        unsafe { std::env::set_var("REQUEST_INTERCEPTION_INITIAL_MODE", "visual_render") };
        let config = Config::load(None).unwrap();
        assert_eq!(config.network.interception_mode, InterceptionMode::VisualRender);

        unsafe { std::env::set_var("REQUEST_INTERCEPTION_INITIAL_MODE", "bogus") };
        assert!(Config::load(None).is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_compact_tree_encoding_bool_parse() {
        clear_env();
        unsafe { std::env::set_var("USE_COMPACT_TREE_ENCODING", "true") };
        let config = Config::load(None).unwrap();
        assert!(config.network.compact_tree_encoding);

        unsafe { std::env::set_var("USE_COMPACT_TREE_ENCODING", "maybe") };
        assert!(Config::load(None).is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_deserialize_yaml_config() {
        clear_env();
        let yaml = r#"
pool:
  session-count: 4
  min-size: 2

navigator:
  model: structured-small
  vision-model: visual-large
  timeout-ms: 30000

budgets:
  memory-mb: 512
  mode: kill_tab

execution:
  max-steps: 10
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.pool.session_count, 4);
        assert_eq!(config.pool.min_size, 2);
        assert_eq!(config.navigator.model, "structured-small");
        assert_eq!(config.budgets.memory_mb, 512.0);
        assert_eq!(config.budgets.mode, crate::monitor::BudgetMode::KillTab);
        assert_eq!(config.execution.max_steps, 10);

        // Defaults for unspecified
        assert_eq!(config.execution.max_retries, 2);
        assert_eq!(config.budgets.sample_interval_ms, 1_000);
    }

    #[test]
    #[serial]
    fn test_load_from_explicit_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghostrun.yml");
        std::fs::write(&path, "pool:\n  session-count: 3\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.pool.session_count, 3);

        // An explicit path that does not exist is an error, not a fallback
        let missing = dir.path().join("nope.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    #[serial]
    fn test_min_size_validation() {
        clear_env();
        let config: Config = serde_yaml::from_str(
            r#"
pool:
  session-count: 2
  min-size: 5
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
