//! Fetch permit error types.

use thiserror::Error;

// ============================================================================
// Permit Error
// ============================================================================

/// Why a fetch permit was not granted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermitError {
    /// The caller cancelled while waiting.
    #[error("Permit request for bin {0} cancelled")]
    Cancelled(String),

    /// The wait deadline passed before the bin allowed a fetch.
    #[error("Timed out waiting for a permit for bin {0}")]
    DeadlineElapsed(String),

    /// The gate was shut down.
    #[error("Permit gate closed")]
    Closed,
}

impl PermitError {
    /// Returns true for `Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

// ============================================================================
// Throttle Error
// ============================================================================

/// Error type for byte throttling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThrottleError {
    /// The throttle's permit was already released.
    #[error("Stream throttle used after its permit was released")]
    Invalidated,
}
