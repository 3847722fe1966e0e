//! Scheduler configuration

use serde::{Deserialize, Serialize};

/// Scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Crash retries per task; attempts = retries + 1
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    2
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

impl SchedulerConfig {
    /// Total attempts allowed per task
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}
