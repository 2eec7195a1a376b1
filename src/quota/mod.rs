//! Quota allocator for balanced metadata.
//!
//! Provides:
//! - `MetadataSchema`: ordered category -> allowed values
//! - `QuotaTable`: remaining targets, weighted draws and restores
//! - `Allocation`: one chosen value per category
//!
//! Categories are drawn independently; no joint distribution across
//! categories is modeled.

mod allocator;
mod schema;

pub use allocator::*;
pub use schema::*;
