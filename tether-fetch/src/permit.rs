//! Fetch permits.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use crate::gate::Bin;
use crate::stream::StreamThrottle;

/// A grant to perform exactly one fetch under a bin.
///
/// Call [`release`](Self::release) when the fetch is done. A permit that is
/// dropped without being released releases itself, so capacity comes back
/// on every exit path including panics. Releasing also invalidates the
/// permit's [`StreamThrottle`].
#[derive(Debug)]
#[must_use = "a permit holds bin capacity until it is released"]
pub struct FetchPermit {
    bin: Arc<Bin>,
    slot: Option<OwnedSemaphorePermit>,
    throttle: StreamThrottle,
}

impl FetchPermit {
    pub(crate) fn new(bin: Arc<Bin>, slot: OwnedSemaphorePermit, throttle: StreamThrottle) -> Self {
        bin.outstanding.fetch_add(1, Ordering::SeqCst);
        Self {
            bin,
            slot: Some(slot),
            throttle,
        }
    }

    /// Returns the bin name.
    pub fn bin(&self) -> &str {
        self.bin.name()
    }

    /// Returns the byte throttle for this fetch.
    pub fn throttle(&self) -> &StreamThrottle {
        &self.throttle
    }

    /// Returns true until the permit is released.
    pub fn is_held(&self) -> bool {
        self.slot.is_some()
    }

    /// Releases the permit.
    pub fn release(mut self) {
        self.release_slot();
    }

    fn release_slot(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        self.throttle.invalidate();
        self.bin.outstanding.fetch_sub(1, Ordering::SeqCst);
        drop(slot);
        debug!(
            bin = %self.bin.name(),
            bytes = self.throttle.bytes_read(),
            "Fetch permit released"
        );
    }
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        self.release_slot();
    }
}
