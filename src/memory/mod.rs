//! Session memory
//!
//! Conversation transcript with context window selection for prompts

pub mod store;

pub use store::{format_history, Transcript};
