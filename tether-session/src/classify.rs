//! Error classification.
//!
//! Raw library failures are reduced to a [`ClassifiedError`] by walking the
//! error's `source()` chain and looking up each link in an
//! [`ErrorTaxonomy`]. The rules are applied in a fixed priority order:
//!
//! 1. any link tagged `Interrupted` gives `Cancelled`
//! 2. an outermost `Configuration` or `Authentication` tag gives `Fatal`
//! 3. any link tagged `Network`, `NotBound` or `RemoteTransport` gives
//!    `Transient` with a retry time of now plus a fixed backoff
//! 4. everything else is `Fatal`

use std::error::Error as StdError;
use std::io;
use std::iter;
use std::sync::Arc;
use std::time::Duration;

use tether_core::clock::saturating_add;
use tether_core::{ClassifiedError, Clock, ErrorKind, ErrorTaxonomy, SystemClock};

use crate::runner::RunFailure;

/// Default backoff applied to transient failures.
pub const DEFAULT_TRANSIENT_BACKOFF: Duration = Duration::from_secs(60);

// ============================================================================
// General Purpose Taxonomy
// ============================================================================

/// Tags `std::io::Error` by its kind.
///
/// Consulted after the library's own taxonomy for every link in the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneralPurpose;

impl ErrorTaxonomy for GeneralPurpose {
    fn kind_of(&self, error: &(dyn StdError + 'static)) -> Option<ErrorKind> {
        let io_error = error.downcast_ref::<io::Error>()?;
        match io_error.kind() {
            io::ErrorKind::Interrupted => Some(ErrorKind::Interrupted),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::NetworkDown => Some(ErrorKind::Network),
            io::ErrorKind::InvalidInput => Some(ErrorKind::Configuration),
            _ => None,
        }
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Reduces raw failures to [`ClassifiedError`].
#[derive(Clone)]
pub struct ErrorClassifier {
    taxonomy: Arc<dyn ErrorTaxonomy>,
    backoff: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("backoff", &self.backoff)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the given taxonomy and backoff.
    pub fn new(taxonomy: Arc<dyn ErrorTaxonomy>, backoff: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            taxonomy,
            backoff,
            clock,
        }
    }

    /// Creates a classifier with the default backoff and the system clock.
    pub fn with_taxonomy(taxonomy: Arc<dyn ErrorTaxonomy>) -> Self {
        Self::new(taxonomy, DEFAULT_TRANSIENT_BACKOFF, Arc::new(SystemClock))
    }

    /// Returns the backoff added to transient failures.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Builds a transient error retrying after the configured backoff.
    pub fn service_interruption(&self, message: impl Into<String>) -> ClassifiedError {
        ClassifiedError::transient(message, saturating_add(self.clock.now(), self.backoff))
    }

    /// Classifies a raw error and its whole source chain.
    pub fn classify(&self, error: &(dyn StdError + 'static)) -> ClassifiedError {
        let kinds: Vec<Option<ErrorKind>> = iter::successors(Some(error), |&e| e.source())
            .map(|e| self.kind_of(e))
            .collect();

        if kinds.contains(&Some(ErrorKind::Interrupted)) {
            return ClassifiedError::Cancelled;
        }

        let message = error.to_string();
        let outermost = kinds.first().copied().flatten();
        if outermost.is_some_and(|k| k.is_operator_actionable()) {
            return ClassifiedError::fatal(message);
        }

        if kinds.iter().flatten().any(ErrorKind::is_transient) {
            return self.service_interruption(message);
        }

        ClassifiedError::fatal(message)
    }

    /// Classifies a runner failure.
    ///
    /// Panics are fatal; runner cancellation is `Cancelled`.
    pub fn classify_failure<E>(&self, failure: &RunFailure<E>) -> ClassifiedError
    where
        E: StdError + 'static,
    {
        match failure {
            RunFailure::Failed(e) => self.classify(e),
            RunFailure::Panicked(msg) => ClassifiedError::fatal(format!("worker panicked: {msg}")),
            RunFailure::Cancelled => ClassifiedError::Cancelled,
        }
    }

    fn kind_of(&self, error: &(dyn StdError + 'static)) -> Option<ErrorKind> {
        self.taxonomy
            .kind_of(error)
            .or_else(|| GeneralPurpose.kind_of(error))
    }
}

// ============================================================================
// Tests
// ============================================================================
