//! Byte-level throttling.
//!
//! Every bin with a byte rate owns one [`ByteBudget`]. Each fetch permit
//! hands out a [`StreamThrottle`] over that budget; readers ask it for
//! permission before a read and report what they actually read afterwards.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::ThrottleError;

/// Largest slice a [`ThrottledRead`] asks permission for at once.
pub const READ_CHUNK: usize = 8 * 1024;

// ============================================================================
// Byte Budget
// ============================================================================

/// Paces byte transfer for a whole bin.
#[derive(Debug)]
pub(crate) struct ByteBudget {
    bytes_per_second: u64,
    next_free: Mutex<Instant>,
}

impl ByteBudget {
    pub(crate) fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second: bytes_per_second.max(1),
            next_free: Mutex::new(Instant::now()),
        }
    }

    fn cost(&self, bytes: usize) -> Duration {
        let bytes = u64::try_from(bytes).unwrap_or(u64::MAX);
        let nanos = u128::from(bytes) * 1_000_000_000 / u128::from(self.bytes_per_second);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Books transfer time for `bytes` and returns how long to wait first.
    fn reserve(&self, bytes: usize) -> Duration {
        let now = Instant::now();
        let mut next_free = self.next_free.lock().unwrap_or_else(PoisonError::into_inner);
        let start = (*next_free).max(now);
        *next_free = start + self.cost(bytes);
        start.saturating_duration_since(now)
    }

    /// Gives back time booked for bytes that were never read.
    fn refund(&self, bytes: usize) {
        let now = Instant::now();
        let mut next_free = self.next_free.lock().unwrap_or_else(PoisonError::into_inner);
        let refunded = next_free.checked_sub(self.cost(bytes)).unwrap_or(now);
        *next_free = refunded.max(now);
    }
}

// ============================================================================
// Stream Throttle
// ============================================================================

#[derive(Debug)]
struct ThrottleShared {
    bin: String,
    valid: AtomicBool,
    budget: Option<Arc<ByteBudget>>,
    bytes_read: AtomicU64,
}

/// Paces the bytes read under one fetch permit.
///
/// Clones share state. The throttle stops granting permission once its
/// permit is released.
#[derive(Debug, Clone)]
pub struct StreamThrottle {
    shared: Arc<ThrottleShared>,
}

impl StreamThrottle {
    pub(crate) fn new(bin: impl Into<String>, budget: Option<Arc<ByteBudget>>) -> Self {
        Self {
            shared: Arc::new(ThrottleShared {
                bin: bin.into(),
                valid: AtomicBool::new(true),
                budget,
                bytes_read: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the bin this throttle paces.
    pub fn bin(&self) -> &str {
        &self.shared.bin
    }

    /// Returns false once the permit has been released.
    pub fn is_valid(&self) -> bool {
        self.shared.valid.load(Ordering::Acquire)
    }

    /// Returns the total bytes reported through `release_read_permission`.
    pub fn bytes_read(&self) -> u64 {
        self.shared.bytes_read.load(Ordering::Relaxed)
    }

    /// Waits until the bin's byte rate allows reading `bytes` more bytes.
    pub async fn obtain_read_permission(&self, bytes: usize) -> Result<(), ThrottleError> {
        let wait = self.reserve(bytes)?;
        if !wait.is_zero() {
            trace!(bin = %self.shared.bin, bytes, wait_ms = wait.as_millis(), "Pacing read");
            tokio::time::sleep(wait).await;
        }
        self.ensure_valid()
    }

    /// Blocking form of [`obtain_read_permission`](Self::obtain_read_permission)
    /// for readers running on a worker thread.
    pub fn obtain_read_permission_blocking(&self, bytes: usize) -> Result<(), ThrottleError> {
        let wait = self.reserve(bytes)?;
        if !wait.is_zero() {
            trace!(bin = %self.shared.bin, bytes, wait_ms = wait.as_millis(), "Pacing read");
            std::thread::sleep(wait);
        }
        self.ensure_valid()
    }

    /// Reports how many of the `requested` bytes were actually read.
    ///
    /// Unused budget goes back to the bin.
    pub fn release_read_permission(&self, requested: usize, actual: usize) {
        if let Some(budget) = &self.shared.budget {
            if actual < requested {
                budget.refund(requested - actual);
            }
        }
        let actual = u64::try_from(actual).unwrap_or(u64::MAX);
        self.shared.bytes_read.fetch_add(actual, Ordering::Relaxed);
    }

    pub(crate) fn invalidate(&self) {
        self.shared.valid.store(false, Ordering::Release);
    }

    fn reserve(&self, bytes: usize) -> Result<Duration, ThrottleError> {
        self.ensure_valid()?;
        Ok(self
            .shared
            .budget
            .as_ref()
            .map_or(Duration::ZERO, |budget| budget.reserve(bytes)))
    }

    fn ensure_valid(&self) -> Result<(), ThrottleError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ThrottleError::Invalidated)
        }
    }
}

// ============================================================================
// Throttled Reader
// ============================================================================

/// A reader whose reads are paced by a [`StreamThrottle`].
#[derive(Debug)]
pub struct ThrottledRead<R> {
    inner: R,
    throttle: StreamThrottle,
}

impl<R: Read> ThrottledRead<R> {
    /// Wraps `inner`.
    pub fn new(inner: R, throttle: StreamThrottle) -> Self {
        Self { inner, throttle }
    }

    /// Returns the wrapped reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwraps the reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ThrottledRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let requested = buf.len().min(READ_CHUNK);
        self.throttle
            .obtain_read_permission_blocking(requested)
            .map_err(io::Error::other)?;

        let result = self.inner.read(&mut buf[..requested]);
        let actual = result.as_ref().map_or(0, |n| *n);
        self.throttle.release_read_permission(requested, actual);
        result
    }
}

// ============================================================================
// Tests
// ============================================================================
