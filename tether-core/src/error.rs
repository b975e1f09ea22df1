//! Core error types for `Tether`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Core Error
// ============================================================================

/// Core error type for parameter and configuration problems.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required connection parameter is absent or empty.
    #[error("Parameter {0} required but not set")]
    MissingParameter(String),

    /// A connection parameter is present but unusable.
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// No connector is registered under this name.
    #[error("Unknown connector: {0}")]
    UnknownConnector(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Creates an invalid parameter error.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Classified Error
// ============================================================================

/// A failure after reclassification.
///
/// Raw library errors never cross the session manager boundary; this is
/// what callers see instead.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ClassifiedError {
    /// Operator-actionable; never retried automatically.
    #[error("{message}")]
    Fatal {
        /// Human-readable description.
        message: String,
    },

    /// The endpoint is temporarily unavailable; retry after `retry_after`.
    #[error("{message}")]
    Transient {
        /// Human-readable description.
        message: String,
        /// Earliest time a retry makes sense.
        retry_after: DateTime<Utc>,
    },

    /// The caller abandoned the operation.
    #[error("Operation cancelled")]
    Cancelled,
}

impl ClassifiedError {
    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Creates a transient error (a service interruption).
    pub fn transient(message: impl Into<String>, retry_after: DateTime<Utc>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after,
        }
    }

    /// Returns true for `Fatal`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Returns true for `Transient`.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true for `Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the retry-after time of a transient error.
    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Transient { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Returns the message, if any.
    pub fn message(&self) -> &str {
        match self {
            Self::Fatal { message } | Self::Transient { message, .. } => message,
            Self::Cancelled => "Operation cancelled",
        }
    }

    /// Returns a short label for the class.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fatal { .. } => "fatal",
            Self::Transient { .. } => "transient",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<CoreError> for ClassifiedError {
    fn from(err: CoreError) -> Self {
        Self::fatal(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
