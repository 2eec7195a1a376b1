//! OpenAI-compatible chat client.

mod chat;

pub use chat::*;
