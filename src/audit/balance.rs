//! Metadata value distribution across a dataset.

use crate::store::LoadedRecord;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Value counts for one metadata category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryBalance {
    pub category: String,
    /// `(value, count)` sorted by count descending, then value
    pub counts: Vec<(String, usize)>,
}

impl CategoryBalance {
    /// Spread between the most and least frequent values.
    pub fn spread(&self) -> usize {
        let max = self.counts.first().map_or(0, |(_, c)| *c);
        let min = self.counts.last().map_or(0, |(_, c)| *c);
        max - min
    }
}

fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Count metadata values per category, categories in first-seen order.
///
/// List-valued metadata counts each element.
pub fn metadata_balance(records: &[LoadedRecord]) -> Vec<CategoryBalance> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, HashMap<String, usize>> = HashMap::new();

    for record in records {
        let Some(metadata) = record.value.get("metadata").and_then(Value::as_object) else {
            continue;
        };
        for (category, value) in metadata {
            let entry = counts.entry(category.clone()).or_insert_with(|| {
                order.push(category.clone());
                HashMap::new()
            });
            match value {
                Value::Array(items) => {
                    for item in items {
                        *entry.entry(value_label(item)).or_insert(0) += 1;
                    }
                }
                other => *entry.entry(value_label(other)).or_insert(0) += 1,
            }
        }
    }

    order
        .into_iter()
        .map(|category| {
            let mut values: Vec<(String, usize)> = counts
                .remove(&category)
                .unwrap_or_default()
                .into_iter()
                .collect();
            values.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            CategoryBalance {
                category,
                counts: values,
            }
        })
        .collect()
}
