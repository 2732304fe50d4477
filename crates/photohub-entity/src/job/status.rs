//! Job priority enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority class for a face-processing job.
///
/// A coarse scheduling hint: it influences selection order within the
/// pending queue but carries no hard latency guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// High priority (selected first).
    High,
    /// Normal priority (default).
    Normal,
    /// Low priority (selected last).
    Low,
}

impl JobPriority {
    /// Return the numeric weight (lower = more urgent).
    pub fn weight(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    /// Return the priority as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
