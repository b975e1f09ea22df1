//! The fetch permit gate.
//!
//! Bins are created on first reference and live as long as the gate. Each
//! bin has its own semaphore and its own start schedule, so waiting in one
//! bin never blocks another. The bin map lock is only held for lookups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tether_core::CancelToken;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, instrument, trace};

use crate::error::PermitError;
use crate::permit::FetchPermit;
use crate::stream::{ByteBudget, StreamThrottle};
use crate::throttle::ThrottleSpec;

// ============================================================================
// Wait Policy
// ============================================================================

/// How long `acquire_permit` may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Wait until granted or cancelled.
    Blocking,
    /// Give up at the deadline.
    Until(Instant),
}

impl Wait {
    /// Gives up after `timeout` from now.
    pub fn within(timeout: Duration) -> Self {
        Self::Until(instant_after(Instant::now(), timeout))
    }
}

/// Roughly thirty years; stands in for offsets an `Instant` cannot hold.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn instant_after(base: Instant, offset: Duration) -> Instant {
    base.checked_add(offset)
        .unwrap_or_else(|| base + FAR_FUTURE)
}

// ============================================================================
// Bin
// ============================================================================

#[derive(Debug)]
struct Schedule {
    next_start: Instant,
    seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    start: Instant,
    seq: u64,
    previous: Instant,
}

/// One rate-limit domain.
#[derive(Debug)]
pub(crate) struct Bin {
    name: String,
    spec: ThrottleSpec,
    slots: Arc<Semaphore>,
    schedule: Mutex<Schedule>,
    budget: Option<Arc<ByteBudget>>,
    pub(crate) outstanding: AtomicUsize,
}

impl Bin {
    fn new(name: &str, spec: ThrottleSpec) -> Self {
        Self {
            name: name.to_string(),
            slots: Arc::new(Semaphore::new(spec.effective_concurrency())),
            schedule: Mutex::new(Schedule {
                next_start: Instant::now(),
                seq: 0,
            }),
            budget: spec.bytes_per_second.map(|rate| Arc::new(ByteBudget::new(rate))),
            outstanding: AtomicUsize::new(0),
            spec,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn reserve_start(&self) -> Reservation {
        let now = Instant::now();
        let mut schedule = self.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = schedule.next_start;
        let start = previous.max(now);
        schedule.next_start = instant_after(start, self.spec.min_interval);
        schedule.seq += 1;
        Reservation {
            start,
            seq: schedule.seq,
            previous,
        }
    }

    fn cancel_reservation(&self, reservation: Reservation) {
        let mut schedule = self.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the latest booking can be handed back without reordering others.
        if schedule.seq == reservation.seq {
            schedule.next_start = reservation.previous;
            trace!(bin = %self.name, "Rate reservation rolled back");
        }
    }
}

/// Hands a start-time booking back if the wait is abandoned.
struct ReservationGuard<'a> {
    bin: &'a Bin,
    reservation: Option<Reservation>,
}

impl ReservationGuard<'_> {
    fn commit(mut self) {
        self.reservation = None;
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            self.bin.cancel_reservation(reservation);
        }
    }
}

// ============================================================================
// Gate
// ============================================================================

/// Grants fetch permits per bin.
#[derive(Debug)]
pub struct FetchPermitGate {
    default_spec: ThrottleSpec,
    overrides: HashMap<String, ThrottleSpec>,
    bins: Mutex<HashMap<String, Arc<Bin>>>,
    closed: AtomicBool,
}

impl Default for FetchPermitGate {
    fn default() -> Self {
        Self::new(ThrottleSpec::default())
    }
}

impl FetchPermitGate {
    /// Creates a gate applying `default_spec` to every bin.
    pub fn new(default_spec: ThrottleSpec) -> Self {
        Self {
            default_spec,
            overrides: HashMap::new(),
            bins: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Overrides the spec for one bin.
    ///
    /// Takes effect for bins not referenced yet.
    #[must_use]
    pub fn with_bin(mut self, bin: impl Into<String>, spec: ThrottleSpec) -> Self {
        self.overrides.insert(bin.into(), spec);
        self
    }

    /// Returns the spec applied to `bin`.
    pub fn spec_for(&self, bin: &str) -> &ThrottleSpec {
        self.overrides.get(bin).unwrap_or(&self.default_spec)
    }

    /// Waits until `bin` allows one more fetch.
    ///
    /// The wait is first for a concurrency slot, then for the bin's next
    /// start time. If `cancel` fires or the deadline passes, any slot or
    /// start time already taken is given back.
    #[instrument(skip(self, cancel), fields(bin = %bin))]
    pub async fn acquire_permit(
        &self,
        bin: &str,
        wait: Wait,
        cancel: &CancelToken,
    ) -> Result<FetchPermit, PermitError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PermitError::Closed);
        }
        if cancel.is_cancelled() {
            return Err(PermitError::Cancelled(bin.to_string()));
        }

        let entry = self.bin(bin);
        let granted = async {
            let slot = Arc::clone(&entry.slots)
                .acquire_owned()
                .await
                .map_err(|_| PermitError::Closed)?;

            let reservation = entry.reserve_start();
            let guard = ReservationGuard {
                bin: &entry,
                reservation: Some(reservation),
            };
            if reservation.start > Instant::now() {
                trace!(bin = %entry.name, "Waiting for the bin's next start time");
                sleep_until(reservation.start).await;
            }
            guard.commit();
            Ok::<_, PermitError>(slot)
        };

        let deadline = match wait {
            Wait::Blocking => None,
            Wait::Until(deadline) => Some(deadline),
        };
        let expired = async {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        let slot = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Permit wait cancelled");
                Err(PermitError::Cancelled(bin.to_string()))
            }
            result = granted => result,
            () = expired => {
                debug!("Permit wait deadline elapsed");
                Err(PermitError::DeadlineElapsed(bin.to_string()))
            }
        }?;

        let throttle = StreamThrottle::new(bin, entry.budget.clone());
        let permit = FetchPermit::new(Arc::clone(&entry), slot, throttle);
        debug!(outstanding = self.outstanding(bin), "Fetch permit granted");
        Ok(permit)
    }

    /// Returns the number of permits currently held for `bin`.
    pub fn outstanding(&self, bin: &str) -> usize {
        self.bins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bin)
            .map_or(0, |entry| entry.outstanding.load(Ordering::SeqCst))
    }

    /// Returns the names of all bins referenced so far.
    pub fn bins(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .bins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Refuses all further permits and wakes every waiter with `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for entry in self.bins.lock().unwrap_or_else(PoisonError::into_inner).values() {
            entry.slots.close();
        }
        debug!("Fetch permit gate closed");
    }

    fn bin(&self, name: &str) -> Arc<Bin> {
        let mut bins = self.bins.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = bins.get(name) {
            return Arc::clone(entry);
        }
        let spec = self.spec_for(name).clone();
        debug!(
            bin = %name,
            max_concurrent = spec.max_concurrent,
            min_interval_ms = spec.min_interval.as_millis(),
            "Creating bin"
        );
        let entry = Arc::new(Bin::new(name, spec));
        bins.insert(name.to_string(), Arc::clone(&entry));
        entry
    }
}

// ============================================================================
// Tests
// ============================================================================
