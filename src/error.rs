//! VoicePay Error Types
//!
//! Centralized error handling for the payment flow, recognition and wallet layers.

use rust_decimal::Decimal;
use thiserror::Error;

/// Central error type for VoicePay
#[derive(Error, Debug)]
pub enum PayError {
    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Audio capture error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("No active user session")]
    NoSession,

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PayError {
    /// Network-level failures; the cached snapshot keeps serving reads when these happen
    pub fn is_transport(&self) -> bool {
        matches!(self, PayError::Transport(_) | PayError::Http(_))
    }
}

/// Result type alias for VoicePay operations
pub type PayResult<T> = Result<T, PayError>;

/// Helper to convert Mutex poison errors
impl<T> From<std::sync::PoisonError<T>> for PayError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PayError::Lock(err.to_string())
    }
}
