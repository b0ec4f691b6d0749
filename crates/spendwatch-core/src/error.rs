//! Error types for Spendwatch

use thiserror::Error;
use uuid::Uuid;

use crate::models::AlertStatus;

/// Result type alias using Spendwatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Spendwatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Lifecycle action not allowed from the alert's current status
    #[error("Cannot {action} alert {alert_id} in status {status}")]
    InvalidTransition {
        alert_id: Uuid,
        status: AlertStatus,
        action: &'static str,
    },

    /// A data-store call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    Notification(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error is worth retrying on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Redis(_) | Self::Timeout(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
