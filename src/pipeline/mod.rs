//! Pipeline module - balanced record generation.

mod balanced;

pub use balanced::*;
