//! Unified error taxonomy for the order lifecycle engine.
//!
//! Every money-affecting path either commits the full ledger transaction or
//! leaves all prior state unchanged; nothing here is ever silently swallowed.

use thiserror::Error;

use crate::coordination::CoordinationError;
use crate::database::DatabaseError;
use crate::providers::ProviderError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Amount {amount} outside channel range [{min}, {max}]")]
    AmountOutOfRange {
        amount: i64,
        min: String,
        max: String,
    },

    #[error("Deposits temporarily blocked, retry after {retry_after_secs}s")]
    TemporarilyBlocked { retry_after_secs: u64 },

    #[error("User already has a withdrawal in progress")]
    OrderInProgress,

    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: i64, required: i64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Invalid callback signature from {provider}")]
    InvalidSignature { provider: String },

    #[error("Duplicate notification for order {order_id}")]
    DuplicateNotification { order_id: String },

    #[error("Invalid order state transition {from} -> {to}")]
    InvalidOrderState { from: String, to: String },

    #[error("Settled amount {settled} does not match recorded amount {expected} for order {order_id}")]
    AmountMismatch {
        order_id: String,
        expected: i64,
        settled: i64,
    },

    #[error("Ledger transaction failed: {message}")]
    TransactionFailed { message: String },

    #[error("Order {key} is locked by a concurrent operation")]
    LockBusy { key: String },

    #[error("No risk reviewer available")]
    NoReviewerAvailable,

    #[error("Order {order_id} not found")]
    NotFound { order_id: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Coordination store error: {0}")]
    Coordination(#[from] CoordinationError),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Map the error to the HTTP status a controller should return.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation { .. } => 400,
            EngineError::AmountOutOfRange { .. } => 400,
            EngineError::TemporarilyBlocked { .. } => 429,
            EngineError::OrderInProgress => 409,
            EngineError::InsufficientBalance { .. } => 422,
            EngineError::Provider(_) => 502,
            EngineError::InvalidSignature { .. } => 401,
            // Acknowledged as success so the provider stops retrying.
            EngineError::DuplicateNotification { .. } => 200,
            EngineError::InvalidOrderState { .. } => 409,
            EngineError::AmountMismatch { .. } => 409,
            EngineError::TransactionFailed { .. } => 500,
            EngineError::LockBusy { .. } => 409,
            EngineError::NoReviewerAvailable => 503,
            EngineError::NotFound { .. } => 404,
            EngineError::Database(_) => 500,
            EngineError::Coordination(_) => 500,
        }
    }

    /// Whether the caller may safely retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TransactionFailed { .. }
                | EngineError::LockBusy { .. }
                | EngineError::Database(_)
                | EngineError::Coordination(_)
        )
    }
}
