//! Per-record structural checks and exact duplicate detection.

use super::Issue;
use crate::models::{Preference, REQUIRED_FIELDS};
use crate::store::LoadedRecord;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Structural issues across `records`, in record order.
pub fn validate_structure(records: &[LoadedRecord]) -> Vec<Issue> {
    let mut issues = Vec::new();

    for record in records {
        let Some(object) = record.value.as_object() else {
            issues.push(Issue::new(record.source(), "record is not a JSON object"));
            continue;
        };

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !object.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            issues.push(Issue::new(
                record.source(),
                format!("missing fields: {}", missing.join(", ")),
            ));
        }

        if let Some(preference) = object.get("preference") {
            let valid = preference.as_str().and_then(Preference::parse).is_some();
            if !valid {
                issues.push(Issue::new(
                    record.source(),
                    format!("invalid preference {preference}"),
                ));
            }
        }

        if let Some(metadata) = object.get("metadata") {
            if !metadata.is_object() {
                issues.push(Issue::new(record.source(), "metadata is not an object"));
            }
        }
    }

    issues
}

/// A record whose responses repeat an earlier record verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateResponses {
    pub first: String,
    pub duplicate: String,
}

/// Records whose trimmed `(response_a, response_b)` match an earlier one.
///
/// Records are identified by `id`, or by source when the id is missing.
pub fn exact_duplicate_responses(records: &[LoadedRecord]) -> Vec<DuplicateResponses> {
    let mut seen: HashMap<(String, String), String> = HashMap::new();
    let mut duplicates = Vec::new();

    for record in records {
        let field = |name: &str| {
            record
                .value
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string()
        };
        let key = (field("response_a"), field("response_b"));
        let label = record
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| record.source());

        match seen.get(&key) {
            Some(first) => duplicates.push(DuplicateResponses {
                first: first.clone(),
                duplicate: label,
            }),
            None => {
                seen.insert(key, label);
            }
        }
    }

    duplicates
}
