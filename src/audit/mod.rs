//! Dataset audit: structure, balance and duplicate checks over stored
//! records, plus a lint for theme files.

mod balance;
mod structure;
mod themes;

use serde::Serialize;
use std::fmt;

pub use balance::{CategoryBalance, metadata_balance};
pub use structure::{DuplicateResponses, exact_duplicate_responses, validate_structure};
pub use themes::check_themes;

/// One problem found by an audit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub source: String,
    pub message: String,
}

impl Issue {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}
