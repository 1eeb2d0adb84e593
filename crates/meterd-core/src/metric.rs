//! Metered resource kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A metered resource kind.
///
/// Every usage event, quota balance, and invoice line is attributed to
/// exactly one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// A single API request.
    ApiCall,

    /// Lines of code reviewed.
    LinesReviewed,

    /// Documents generated.
    DocsGenerated,
}

impl Metric {
    /// All metrics, in stable order.
    pub const ALL: [Metric; 3] = [Metric::ApiCall, Metric::LinesReviewed, Metric::DocsGenerated];

    /// Get the metric name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ApiCall => "api_call",
            Self::LinesReviewed => "lines_reviewed",
            Self::DocsGenerated => "docs_generated",
        }
    }

    /// Stable single-byte encoding used in storage keys.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::ApiCall => 0,
            Self::LinesReviewed => 1,
            Self::DocsGenerated => 2,
        }
    }

    /// Decode a metric from its storage-key byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::ApiCall),
            1 => Some(Self::LinesReviewed),
            2 => Some(Self::DocsGenerated),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_call" => Ok(Self::ApiCall),
            "lines_reviewed" => Ok(Self::LinesReviewed),
            "docs_generated" => Ok(Self::DocsGenerated),
            other => Err(UnknownMetric(other.to_string())),
        }
    }
}

/// Error returned when parsing an unknown metric name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric: {0}")]
pub struct UnknownMetric(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_encoding_roundtrip() {
        for metric in Metric::ALL {
            assert_eq!(Metric::from_byte(metric.as_byte()), Some(metric));
        }
        assert_eq!(Metric::from_byte(9), None);
    }

    #[test]
    fn string_roundtrip() {
        for metric in Metric::ALL {
            assert_eq!(metric.as_str().parse::<Metric>().unwrap(), metric);
        }
        assert!("tokens".parse::<Metric>().is_err());
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&Metric::LinesReviewed).unwrap();
        assert_eq!(json, "\"lines_reviewed\"");
    }
}
