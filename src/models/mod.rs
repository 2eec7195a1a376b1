//! Core data models for prefgen.
//!
//! - Configuration resolved from TOML
//! - Error taxonomy shared by every module
//! - Theme, draft item and record types

mod config;
mod error;
mod record;

pub use config::*;
pub use error::*;
pub use record::*;
