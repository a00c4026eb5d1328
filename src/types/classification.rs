//! Risk classification outcome

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification outcome deciding whether a transaction is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Low,
}

impl Priority {
    /// HIGH only when the score is strictly above the threshold.
    pub fn from_score(risk_score: f64, threshold: f64) -> Self {
        if risk_score > threshold {
            Priority::High
        } else {
            Priority::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH" => Ok(Priority::High),
            "LOW" => Ok(Priority::Low),
            other => anyhow::bail!("unknown priority {other:?}"),
        }
    }
}

/// Result of scoring one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Risk score (0.0 - 1.0)
    pub risk_score: f64,
    /// Wall time spent in the classifier, whole milliseconds, at least 1
    pub inference_time_ms: f64,
    pub priority: Priority,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_score() {
        assert_eq!(Priority::from_score(0.81, 0.8), Priority::High);
        assert_eq!(Priority::from_score(0.8, 0.8), Priority::Low);
        assert_eq!(Priority::from_score(0.1, 0.8), Priority::Low);
        assert_eq!(Priority::from_score(1.0, 1.0), Priority::Low);
    }

    #[test]
    fn test_priority_wire_format() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"HIGH\"");
        assert_eq!("LOW".parse::<Priority>().unwrap(), Priority::Low);
        assert!("medium".parse::<Priority>().is_err());
    }
}
