//! Cooperative cancellation.
//!
//! Two signals flow in opposite directions:
//!
//! - [`CancelToken`] is held by a calling flow. Waits inside the session
//!   manager and the permit gate race against it and return `Cancelled`
//!   promptly once it fires.
//! - [`Interrupt`] is handed to a worker running a blocking library call.
//!   The worker may poll it; nothing forces it to stop.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

// ============================================================================
// Cancel Token
// ============================================================================

/// Caller-side cancellation signal.
///
/// Clones share the same underlying signal. Once cancelled a token stays
/// cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Creates a token that has not been cancelled.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancels every clone of this token.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Interrupt
// ============================================================================

/// Worker-side interruption request.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Creates an interrupt that has not been requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the worker stop at its next opportunity.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once interruption was requested.
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns an `Interrupted` I/O error if interruption was requested.
    ///
    /// Library adapters call this between blocking steps; the error
    /// classifies as `Cancelled`.
    pub fn check(&self) -> io::Result<()> {
        if self.is_requested() {
            Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "operation interrupted",
            ))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
