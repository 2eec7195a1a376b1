//! Quota table: exact-balance metadata allocation.
//!
//! Invariants:
//! - Per category, `remaining + outstanding == total` at all times
//! - A value with zero remaining is never drawn (hard cap, not down-weighting)
//! - A failed draw leaves the table unchanged

use super::schema::{Allocation, MetadataSchema};
use crate::models::{PrefgenError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Remaining count for one metadata value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ValueQuota {
    value: String,
    remaining: usize,
}

/// Quota state for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CategoryQuota {
    name: String,
    total: usize,
    values: Vec<ValueQuota>,
}

impl CategoryQuota {
    fn remaining(&self) -> usize {
        self.values.iter().map(|v| v.remaining).sum()
    }

    /// Pick a value index with weight equal to its remaining count.
    fn pick<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        let available = self.remaining();
        if available == 0 {
            return None;
        }

        let target = rng.random_range(0..available);
        let mut cumulative = 0usize;
        for (idx, value) in self.values.iter().enumerate() {
            cumulative += value.remaining;
            if target < cumulative {
                return Some(idx);
            }
        }

        None
    }
}

/// Remaining quota per metadata category and value.
///
/// Owned by the caller and passed by `&mut` into every draw/restore;
/// each draw observes the post-decrement state of the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaTable {
    categories: Vec<CategoryQuota>,
}

impl QuotaTable {
    /// Spread `total_records` as evenly as possible over each category.
    ///
    /// The i-th value gets `total / V + 1` when `i < total % V`, else `total / V`.
    pub fn initialize(schema: &MetadataSchema, total_records: usize) -> Result<Self> {
        let mut categories = Vec::with_capacity(schema.len());

        for category in schema.categories() {
            let num_values = category.values.len();
            if num_values == 0 {
                return Err(PrefgenError::Configuration(format!(
                    "metadata category '{}' has no values",
                    category.name
                )));
            }

            let base = total_records / num_values;
            let remainder = total_records % num_values;

            let values = category
                .values
                .iter()
                .enumerate()
                .map(|(i, value)| ValueQuota {
                    value: value.clone(),
                    remaining: base + usize::from(i < remainder),
                })
                .collect();

            categories.push(CategoryQuota {
                name: category.name.clone(),
                total: total_records,
                values,
            });
        }

        Ok(Self { categories })
    }

    /// Draw one value per category and reserve it.
    ///
    /// Fails with `QuotaExhausted` naming the first category that has
    /// nothing left; in that case the table is left untouched.
    pub fn draw<R: Rng>(&mut self, rng: &mut R) -> Result<Allocation> {
        let mut picks = Vec::with_capacity(self.categories.len());

        for category in &self.categories {
            match category.pick(rng) {
                Some(idx) => picks.push(idx),
                None => {
                    return Err(PrefgenError::QuotaExhausted {
                        category: category.name.clone(),
                    });
                }
            }
        }

        let mut allocation = Allocation::default();
        for (category, idx) in self.categories.iter_mut().zip(picks) {
            let chosen = &mut category.values[idx];
            chosen.remaining -= 1;
            allocation.push(category.name.clone(), chosen.value.clone());
        }

        Ok(allocation)
    }

    /// Return an allocation's values to the pool.
    ///
    /// Precondition: called at most once per successful `draw`. This is not
    /// checked; restoring twice over-credits the table.
    pub fn restore(&mut self, allocation: &Allocation) -> Result<()> {
        let mut targets = Vec::with_capacity(allocation.len());

        for (category, value) in allocation.iter() {
            let position = self.categories.iter().position(|c| c.name == category).and_then(
                |ci| {
                    self.categories[ci]
                        .values
                        .iter()
                        .position(|v| v.value == value)
                        .map(|vi| (ci, vi))
                },
            );

            match position {
                Some(pos) => targets.push(pos),
                None => {
                    return Err(PrefgenError::UnknownAllocation {
                        category: category.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }

        for (ci, vi) in targets {
            self.categories[ci].values[vi].remaining += 1;
        }

        Ok(())
    }

    /// Remaining count for a category/value pair.
    pub fn remaining(&self, category: &str, value: &str) -> Option<usize> {
        self.category(category)?
            .values
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.remaining)
    }

    /// Sum of remaining counts in a category.
    pub fn remaining_in(&self, category: &str) -> Option<usize> {
        self.category(category).map(CategoryQuota::remaining)
    }

    /// Allocations drawn from a category and not yet restored.
    ///
    /// Saturates at zero if `restore` was called more often than `draw`.
    pub fn outstanding(&self, category: &str) -> Option<usize> {
        self.category(category)
            .map(|c| c.total.saturating_sub(c.remaining()))
    }

    /// Whether any category has nothing left to offer.
    pub fn is_exhausted(&self) -> bool {
        self.categories.iter().any(|c| c.remaining() == 0)
    }

    /// Category names in schema order.
    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    /// Serializable view of the current counts.
    pub fn snapshot(&self) -> Vec<QuotaSnapshot> {
        self.categories
            .iter()
            .map(|c| QuotaSnapshot {
                category: c.name.clone(),
                total: c.total,
                remaining: c
                    .values
                    .iter()
                    .map(|v| (v.value.clone(), v.remaining))
                    .collect(),
            })
            .collect()
    }

    fn category(&self, name: &str) -> Option<&CategoryQuota> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// Remaining counts of one category at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub category: String,
    pub total: usize,
    pub remaining: Vec<(String, usize)>,
}

impl QuotaSnapshot {
    /// The `n` values with the most remaining quota, ties in schema order.
    pub fn top(&self, n: usize) -> Vec<(&str, usize)> {
        let mut sorted: Vec<_> = self
            .remaining
            .iter()
            .map(|(v, c)| (v.as_str(), *c))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted.truncate(n);
        sorted
    }
}
