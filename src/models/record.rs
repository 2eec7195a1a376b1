//! Record, theme and run statistics types.
//!
//! These types represent the data flowing through a generation run:
//! Theme + Allocation → DraftItem → (API) → Record.

use crate::quota::{Allocation, QuotaSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level fields every dataset record must carry.
pub const REQUIRED_FIELDS: [&str; 8] = [
    "id",
    "theme",
    "prompt",
    "response_a",
    "response_b",
    "preference",
    "rationale",
    "metadata",
];

/// Keys every theme object must carry.
pub const THEME_KEYS: [&str; 5] = ["theme", "description", "examples", "use_case", "metadata"];

/// A generation theme loaded from the themes directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Theme {
    /// Short theme name
    #[serde(default)]
    pub theme: String,

    /// Longer description of the theme
    #[serde(default)]
    pub description: String,

    /// Example prompts or situations
    #[serde(default)]
    pub examples: Vec<Value>,

    /// Intended use case
    #[serde(default)]
    pub use_case: String,

    /// Free-form theme metadata (not used for quota balancing)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// One item of a generation batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftItem {
    /// Identifier the model must echo back
    pub id: String,

    /// Theme name
    pub theme: String,

    /// Theme description
    pub description: String,

    /// Theme examples
    pub examples: Vec<Value>,

    /// Theme use case
    pub use_case: String,

    /// Metadata drawn from the quota table
    pub metadata: Allocation,
}

impl DraftItem {
    /// Build a draft item from a theme and an allocation.
    pub fn new(id: impl Into<String>, theme: &Theme, metadata: Allocation) -> Self {
        Self {
            id: id.into(),
            theme: theme.theme.clone(),
            description: theme.description.clone(),
            examples: theme.examples.clone(),
            use_case: theme.use_case.clone(),
            metadata,
        }
    }
}

/// Which response is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    /// `response_a` is more aligned
    A,
    /// `response_b` is more aligned
    B,
}

impl Preference {
    /// Parse the dataset representation (`"a"` or `"b"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "a" => Some(Self::A),
            "b" => Some(Self::B),
            _ => None,
        }
    }
}

/// A validated preference record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub theme: String,
    pub prompt: String,
    pub response_a: String,
    pub response_b: String,
    pub preference: Preference,
    pub rationale: String,
    pub metadata: Map<String, Value>,
}

/// Statistics for a generation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Records requested
    pub target_records: usize,

    /// Batches sent to the generator
    pub batches: usize,

    /// Records that passed validation and were persisted
    pub accepted: usize,

    /// Items whose returned record failed validation
    pub validation_failures: usize,

    /// Batches whose generation call failed outright
    pub generation_failures: usize,

    /// Allocations returned to the quota table
    pub restored_allocations: usize,

    /// Items dropped after exhausting their attempts
    pub dropped_items: usize,

    /// Retry budget left when the run stopped
    pub retry_budget_left: usize,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Accepted records per hour
    pub throughput_per_hour: f64,

    /// Accepted / attempted items (0.0 - 1.0)
    pub acceptance_rate: f64,

    /// Remaining quota at the end of the run
    #[serde(default)]
    pub quota: Vec<QuotaSnapshot>,
}

impl RunStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        let attempted = self.accepted + self.validation_failures;
        if attempted > 0 {
            self.acceptance_rate = self.accepted as f64 / attempted as f64;
        }
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.accepted as f64 / self.runtime_secs * 3600.0;
        }
    }

    /// Whether the requested number of records was produced.
    pub fn is_complete(&self) -> bool {
        self.accepted >= self.target_records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Preference::A).unwrap(), r#""a""#);
        assert_eq!(Preference::parse("b"), Some(Preference::B));
        assert_eq!(Preference::parse("B"), None);
    }

    #[test]
    fn test_theme_tolerates_missing_fields() {
        let theme: Theme = serde_json::from_str(r#"{"theme": "grief"}"#).unwrap();
        assert_eq!(theme.theme, "grief");
        assert!(theme.examples.is_empty());
        assert!(theme.metadata.is_null());
    }

    #[test]
    fn test_run_stats_finalize() {
        let mut stats = RunStats {
            target_records: 10,
            accepted: 8,
            validation_failures: 2,
            runtime_secs: 3600.0,
            ..Default::default()
        };
        stats.finalize();
        assert!((stats.acceptance_rate - 0.8).abs() < 1e-9);
        assert!((stats.throughput_per_hour - 8.0).abs() < 1e-9);
        assert!(!stats.is_complete());
    }
}
