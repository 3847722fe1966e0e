//! Priority levels for pool queue placement

use serde::{Deserialize, Serialize};

/// Priority for session acquisition
///
/// Foreground requests jump ahead of all background requests in the pool
/// queue; insertion order is preserved within each class. Priority has no
/// effect once a lease is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Background,
    Foreground,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::Foreground => write!(f, "foreground"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "foreground" => Ok(Self::Foreground),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}
