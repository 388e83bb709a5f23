//! Error types for the sidekick loop and the account ledger

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::LoopState;

/// Result type alias for sidekick operations
pub type Result<T> = std::result::Result<T, SidekickError>;

#[derive(Error, Debug)]
pub enum SidekickError {

    // =============================
    // Ledger Errors
    // =============================

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Decimal, available: Decimal },

    #[error("Insufficient shares of {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        symbol: String,
        requested: u64,
        held: u64,
    },

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    // =============================
    // Loop Errors
    // =============================

    #[error("Tool failure: {0}")]
    ToolFailure(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Clarification needed: {0}")]
    ClarificationNeeded(String),

    #[error("Round limit exceeded after {0} rounds")]
    RoundLimitExceeded(u32),

    #[error("Invalid transition from {from:?}: {action}")]
    InvalidTransition { from: LoopState, action: String },

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
