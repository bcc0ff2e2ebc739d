//! Portfolio health report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health band of a 0-100 portfolio score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Score 80 and above.
    Healthy,
    /// Score 60 to 79.
    Caution,
    /// Score 40 to 59.
    Warning,
    /// Score below 40.
    Critical,
}

impl HealthStatus {
    /// Band a score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Healthy
        } else if score >= 60.0 {
            Self::Caution
        } else if score >= 40.0 {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Caution => write!(f, "CAUTION"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Portfolio health with the findings behind the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioHealth {
    /// 100 minus deductions, floored at zero.
    pub score: f64,
    /// Band of the score.
    pub status: HealthStatus,
    /// What lowered the score.
    pub issues: Vec<String>,
    /// Suggested remedies, one per issue.
    pub recommendations: Vec<String>,
    /// When the report was produced.
    pub assessed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(100.0, HealthStatus::Healthy ; "perfect")]
    #[test_case(80.0, HealthStatus::Healthy ; "healthy floor")]
    #[test_case(79.0, HealthStatus::Caution ; "caution ceiling")]
    #[test_case(60.0, HealthStatus::Caution ; "caution floor")]
    #[test_case(45.0, HealthStatus::Warning ; "warning")]
    #[test_case(39.0, HealthStatus::Critical ; "critical")]
    fn test_health_bands(score: f64, expected: HealthStatus) {
        assert_eq!(HealthStatus::from_score(score), expected);
    }
}
