//! Sidekick
//!
//! A personal co-worker agent that:
//! - Runs a worker model that may call tools (search, fetch, files, Python, push)
//! - Has an evaluator judge every answer against the user's success criteria
//! - Loops with feedback until the criteria are met, input is needed, or rounds run out
//! - Rolls a session back when a round fails part way
//! - Records every run with a tamper-evident transcript digest
//!
//! Also carries a small trading-account ledger and a research pipeline.
//!
//! LOOP:
//! INPUT → WORK (⇄ TOOL) → EVALUATE → DONE | CLARIFY | WORK

pub mod agent;
pub mod api;
pub mod audit;
pub mod completion;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod execution;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod research;
pub mod state;
pub mod tools;
pub mod worker;

pub use error::Result;

// Re-export common types
pub use agent::{LoopConfig, Sidekick};
pub use error::SidekickError;
pub use models::*;
