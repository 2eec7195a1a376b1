//! Metadata schema and allocation types.

use crate::models::{PrefgenError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

/// One metadata category and its allowed values, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub values: Vec<String>,
}

/// Ordered mapping from category name to allowed values.
///
/// Order matters: quota remainders go to the first listed values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSchema {
    categories: Vec<Category>,
}

impl MetadataSchema {
    /// Build a schema from `(category, values)` pairs.
    ///
    /// Duplicate categories or duplicate values within a category are
    /// configuration errors. Empty categories are accepted here and rejected
    /// when a quota table is initialized.
    pub fn new<C, V, I>(categories: impl IntoIterator<Item = (C, I)>) -> Result<Self>
    where
        C: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for (name, values) in categories {
            let name = name.into();
            if !seen.insert(name.clone()) {
                return Err(PrefgenError::Configuration(format!(
                    "duplicate metadata category '{name}'"
                )));
            }

            let mut seen_values = HashSet::new();
            let mut collected = Vec::new();
            for value in values {
                let value = value.into();
                if !seen_values.insert(value.clone()) {
                    return Err(PrefgenError::Configuration(format!(
                        "duplicate value '{value}' in category '{name}'"
                    )));
                }
                collected.push(value);
            }

            out.push(Category {
                name,
                values: collected,
            });
        }

        Ok(Self { categories: out })
    }

    /// Parse a schema from a JSON object of `category -> [values]`.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| PrefgenError::Configuration(format!("metadata schema is not JSON: {e}")))?;

        let Value::Object(map) = value else {
            return Err(PrefgenError::Configuration(
                "metadata schema must be a JSON object".to_string(),
            ));
        };

        let mut pairs = Vec::with_capacity(map.len());
        for (name, values) in map {
            let Value::Array(items) = values else {
                return Err(PrefgenError::Configuration(format!(
                    "category '{name}' must map to a list of values"
                )));
            };
            let mut strings = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => strings.push(s),
                    other => {
                        return Err(PrefgenError::Configuration(format!(
                            "category '{name}' has a non-string value: {other}"
                        )));
                    }
                }
            }
            pairs.push((name, strings));
        }

        Self::new(pairs)
    }

    /// Load a schema file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PrefgenError::io(format!("reading metadata schema {}", path.display()), e))?;
        Self::from_json_str(&content)
    }

    /// Categories in schema order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Category names in schema order.
    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// One chosen value per category, produced by a quota draw.
///
/// Serializes as a JSON object in schema order, which is also the shape
/// of a record's `metadata` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Allocation {
    choices: Vec<(String, String)>,
}

impl Allocation {
    pub(crate) fn push(&mut self, category: impl Into<String>, value: impl Into<String>) {
        self.choices.push((category.into(), value.into()));
    }

    /// Chosen value for a category.
    pub fn get(&self, category: &str) -> Option<&str> {
        self.choices
            .iter()
            .find(|(c, _)| c == category)
            .map(|(_, v)| v.as_str())
    }

    /// `(category, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.choices.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Render as a JSON metadata object.
    pub fn to_metadata(&self) -> Map<String, Value> {
        self.clone().into()
    }
}

impl From<Allocation> for Map<String, Value> {
    fn from(allocation: Allocation) -> Self {
        allocation
            .choices
            .into_iter()
            .map(|(c, v)| (c, Value::String(v)))
            .collect()
    }
}

impl TryFrom<Map<String, Value>> for Allocation {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        let mut allocation = Allocation::default();
        for (category, value) in map {
            match value {
                Value::String(v) => allocation.push(category, v),
                other => return Err(format!("category '{category}' has non-string value {other}")),
            }
        }
        Ok(allocation)
    }
}
