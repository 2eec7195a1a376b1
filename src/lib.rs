//! prefgen - Balanced preference dataset generation and cleanup for RLHF.
//!
//! ## Architecture
//!
//! prefgen has two independent halves:
//! - **Quota Allocator**: keeps the metadata of generated records balanced
//!   by drawing each value with probability proportional to its remaining
//!   target, and restoring the draw when a record is rejected
//! - **Near-Duplicate Resolver**: scores prompt pairs with TF-IDF cosine
//!   similarity to report near-duplicates or greedily reduce a dataset
//!
//! ## Pipeline
//!
//! Themes + QuotaTable → DraftItems → RecordGenerator → validate → store.
//! Rejected items give their allocation back and are retried in a later
//! batch, bounded by a retry budget.
//!
//! ## Supporting modules
//!
//! - `client`: OpenAI-compatible chat client with an injectable retry policy
//! - `store`: JSON-array record files with atomic writes
//! - `audit`: structure, balance and exact-duplicate checks

pub mod audit;
pub mod client;
pub mod dedup;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod quota;
pub mod store;

// Re-exports for convenience
pub use client::ChatClient;
pub use dedup::{PromptCorpus, SimilarityMatrix, find_pairs, reduce, similarity};
pub use generation::{ApiGenerator, RecordGenerator};
pub use models::{Config, PrefgenError, Record, Result, RunStats, Theme};
pub use pipeline::BalancedGenerator;
pub use quota::{Allocation, MetadataSchema, QuotaTable};
