//! Session lifecycle manager.
//!
//! Owns at most one live session per connector instance and serializes
//! every lifecycle transition behind a single async mutex. Library calls run
//! on the [`OperationRunner`], so a hung library never holds a caller
//! hostage: the caller cancels, the worker is abandoned, and its late
//! result is discarded by generation the next time the lifecycle is
//! touched.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_core::clock::saturating_add;
use tether_core::{
    CancelToken, ClassifiedError, Clock, ConnectionParams, Interrupt, LifecycleState,
    SessionFactory, SystemClock,
};
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use tracing::{debug, info, instrument, trace, warn};

use crate::classify::ErrorClassifier;
use crate::runner::{Abandoned, DeadLetters, OperationRunner};
use crate::settings::{HealthRetry, SessionSettings};

// ============================================================================
// Lease
// ============================================================================

/// Shared access to the live session for the duration of one operation.
#[derive(Debug)]
pub struct SessionLease<S> {
    session: Arc<S>,
    generation: u64,
}

impl<S> SessionLease<S> {
    /// Returns the generation that created this session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the shared session handle.
    pub fn session(&self) -> &Arc<S> {
        &self.session
    }
}

impl<S> Clone for SessionLease<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            generation: self.generation,
        }
    }
}

impl<S> Deref for SessionLease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Counters describing what a manager has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Sessions successfully created.
    pub sessions_created: u64,
    /// Workers spawned for any library call.
    pub workers_spawned: u64,
    /// Fresh acquire and check cycles started by `check_healthy`.
    pub health_retries: u64,
    /// Late results of abandoned workers that were dropped.
    pub stale_discarded: u64,
    /// Teardowns that failed or timed out.
    pub teardown_failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    sessions_created: AtomicU64,
    workers_spawned: AtomicU64,
    health_retries: AtomicU64,
    stale_discarded: AtomicU64,
    teardown_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            health_retries: self.health_retries.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            teardown_failures: self.teardown_failures.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ============================================================================
// Lifecycle State
// ============================================================================

struct SessionSlot<S> {
    session: Arc<S>,
    generation: u64,
    created_at: DateTime<Utc>,
    last_touched: DateTime<Utc>,
}

impl<S> SessionSlot<S> {
    fn lease(&self) -> SessionLease<S> {
        SessionLease {
            session: Arc::clone(&self.session),
            generation: self.generation,
        }
    }
}

struct Lifecycle<S, E> {
    slot: Option<SessionSlot<S>>,
    generation: u64,
    stale_tx: DeadLetters<S, E>,
    stale_rx: mpsc::UnboundedReceiver<Abandoned<S, E>>,
}

type Inner<F> = Lifecycle<<F as SessionFactory>::Session, <F as SessionFactory>::Error>;

// ============================================================================
// Session Manager
// ============================================================================

/// Lazily creates, health-checks, expires and releases one session.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct SessionManager<F: SessionFactory> {
    factory: Arc<F>,
    params: Arc<ConnectionParams>,
    settings: SessionSettings,
    classifier: ErrorClassifier,
    runner: OperationRunner,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner<F>>,
    state: watch::Sender<LifecycleState>,
    stats: StatsCounters,
    /// Generation whose exchange was abandoned mid-call; 0 when none.
    poisoned: AtomicU64,
}

impl<F: SessionFactory> std::fmt::Debug for SessionManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("connector", &self.factory.name())
            .field("params", &self.params)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<F: SessionFactory> SessionManager<F> {
    /// Creates a manager using the system clock.
    pub fn new(factory: F, params: ConnectionParams, settings: SessionSettings) -> Self {
        Self::with_clock(factory, params, settings, Arc::new(SystemClock))
    }

    /// Creates a manager with an explicit clock.
    pub fn with_clock(
        factory: F,
        params: ConnectionParams,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let classifier = ErrorClassifier::new(
            factory.taxonomy(),
            settings.transient_backoff,
            Arc::clone(&clock),
        );
        let runner = OperationRunner::new(factory.name());
        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LifecycleState::Idle);

        Self {
            factory: Arc::new(factory),
            params: Arc::new(params),
            settings,
            classifier,
            runner,
            clock,
            inner: Mutex::new(Lifecycle {
                slot: None,
                generation: 0,
                stale_tx,
                stale_rx,
            }),
            state,
            stats: StatsCounters::default(),
            poisoned: AtomicU64::new(0),
        }
    }

    /// Returns the session factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Returns the connection parameters.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Returns the settings.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Returns the classifier used for this factory's errors.
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Returns the current lifecycle state without blocking.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Subscribes to lifecycle state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Returns true while a session is held.
    pub fn has_session(&self) -> bool {
        self.state().has_session()
    }

    // ========================================================================
    // Lifecycle Operations
    // ========================================================================

    /// Returns the live session, creating one if needed.
    ///
    /// A live session that has not expired is reused and touched. Otherwise
    /// the parameters are validated (a missing one is `Fatal` with no worker
    /// spawned), any expired session is torn down, and a new one is created
    /// on a worker.
    #[instrument(skip(self, cancel), fields(connector = %self.factory.name()))]
    pub async fn acquire(
        &self,
        cancel: &CancelToken,
    ) -> Result<SessionLease<F::Session>, ClassifiedError> {
        let mut inner = self.lock(cancel).await?;
        self.acquire_locked(&mut inner, cancel).await
    }

    /// Verifies the connection with a lightweight round trip.
    ///
    /// A transient failure of a session that already existed discards it
    /// and retries according to [`HealthRetry`]; a transient failure of a
    /// session created by this call is returned as is.
    #[instrument(skip(self, cancel), fields(connector = %self.factory.name()))]
    pub async fn check_healthy(&self, cancel: &CancelToken) -> Result<(), ClassifiedError> {
        let mut inner = self.lock(cancel).await?;
        let entered_with_session = inner.slot.is_some();

        loop {
            let had_session = inner.slot.is_some();
            let lease = self.acquire_locked(&mut inner, cancel).await?;

            self.set_state(LifecycleState::Checking);
            bump(&self.stats.workers_spawned);
            let factory = Arc::clone(&self.factory);
            let session = Arc::clone(&lease.session);
            let outcome = self
                .runner
                .run("check", cancel, move |interrupt| {
                    factory.check(&session, interrupt)
                })
                .await;

            let failure = match outcome {
                Ok(()) => {
                    touch_slot(&mut *inner, lease.generation, self.clock.now());
                    self.set_state(LifecycleState::Active);
                    debug!(generation = lease.generation, "Health check passed");
                    return Ok(());
                }
                Err(failure) => failure,
            };

            let err = self.classifier.classify_failure(&failure);
            match err {
                ClassifiedError::Cancelled => {
                    // The abandoned worker may still own half an exchange.
                    debug!(generation = lease.generation, "Health check cancelled; discarding session");
                    self.discard_locked(&mut inner);
                    return Err(err);
                }
                ClassifiedError::Fatal { .. } => {
                    warn!(error = %err, "Health check failed");
                    self.teardown_locked(&mut inner).await;
                    return Err(err);
                }
                ClassifiedError::Transient { .. } => {
                    warn!(error = %err, "Health check failed transiently; discarding session");
                    self.teardown_locked(&mut inner).await;

                    let retry = match self.settings.health_retry {
                        HealthRetry::FreshAttempt => had_session,
                        HealthRetry::UntilSettled => entered_with_session,
                    };
                    if !retry {
                        return Err(err);
                    }
                    bump(&self.stats.health_retries);
                    info!("Retrying health check with a fresh session");
                }
            }
        }
    }

    /// Tears down the live session, if any.
    ///
    /// Teardown failures are logged and never reach the caller.
    #[instrument(skip(self), fields(connector = %self.factory.name()))]
    pub async fn release(&self) {
        let mut inner = self.inner.lock().await;
        self.drain_stale(&mut inner).await;
        if inner.slot.is_some() {
            info!("Releasing session");
            self.teardown_locked(&mut inner).await;
        }
    }

    /// Tears down the session if it has been idle past the timeout.
    ///
    /// Returns true if a session was released. When another lifecycle
    /// operation is in progress the session is in use, so this returns
    /// false without waiting.
    #[instrument(skip(self), fields(connector = %self.factory.name()))]
    pub async fn maybe_expire(&self) -> bool {
        let Ok(mut inner) = self.inner.try_lock() else {
            trace!("Lifecycle busy; skipping expiry check");
            return false;
        };
        self.drain_stale(&mut inner).await;

        let now = self.clock.now();
        let Some(idle_since) = inner
            .slot
            .as_ref()
            .filter(|slot| self.is_expired(slot, now))
            .map(|slot| slot.last_touched)
        else {
            return false;
        };

        info!(idle_since = %idle_since, "Session idle; releasing");
        self.teardown_locked(&mut inner).await;
        true
    }

    /// Runs a library call against the live session.
    ///
    /// The lifecycle lock is held only while acquiring, so several calls
    /// may share one session. A transient failure invalidates the session
    /// it ran against, and so does cancelling the call.
    #[instrument(skip(self, cancel, op), fields(connector = %self.factory.name()))]
    pub async fn execute<T, Op>(&self, cancel: &CancelToken, op: Op) -> Result<T, ClassifiedError>
    where
        Op: FnOnce(&F::Session, &Interrupt) -> Result<T, F::Error> + Send + 'static,
        T: Send + 'static,
    {
        let lease = self.acquire(cancel).await?;
        self.run_on(lease, cancel, op).await
    }

    /// Runs a library call against a session already acquired.
    ///
    /// Behaves like [`execute`](Self::execute) after its acquire step, so a
    /// caller can do other waiting between the two.
    pub async fn run_on<T, Op>(
        &self,
        lease: SessionLease<F::Session>,
        cancel: &CancelToken,
        op: Op,
    ) -> Result<T, ClassifiedError>
    where
        Op: FnOnce(&F::Session, &Interrupt) -> Result<T, F::Error> + Send + 'static,
        T: Send + 'static,
    {
        let generation = lease.generation;
        let session = lease.session;

        bump(&self.stats.workers_spawned);
        let outcome = self
            .runner
            .run("execute", cancel, move |interrupt| op(session.as_ref(), interrupt))
            .await;

        match outcome {
            Ok(value) => {
                self.touch(generation);
                Ok(value)
            }
            Err(failure) => {
                let err = self.classifier.classify_failure(&failure);
                match &err {
                    ClassifiedError::Transient { .. } => {
                        warn!(generation, error = %err, "Operation failed transiently");
                        self.invalidate(generation, cancel).await;
                    }
                    ClassifiedError::Fatal { .. } => {
                        warn!(generation, error = %err, "Operation failed");
                    }
                    ClassifiedError::Cancelled => {
                        debug!(generation, "Operation cancelled; discarding session");
                        self.poison(generation);
                    }
                }
                Err(err)
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn lock(&self, cancel: &CancelToken) -> Result<MutexGuard<'_, Inner<F>>, ClassifiedError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Cancelled while waiting for the lifecycle lock");
                Err(ClassifiedError::Cancelled)
            }
            guard = self.inner.lock() => Ok(guard),
        }
    }

    async fn acquire_locked(
        &self,
        inner: &mut Inner<F>,
        cancel: &CancelToken,
    ) -> Result<SessionLease<F::Session>, ClassifiedError> {
        self.drain_stale(inner).await;
        self.discard_poisoned(inner);
        let now = self.clock.now();

        if let Some(slot) = inner.slot.as_mut().filter(|slot| !self.is_expired(slot, now)) {
            slot.last_touched = now;
            trace!(generation = slot.generation, "Reusing session");
            return Ok(slot.lease());
        }
        if inner.slot.is_some() {
            debug!("Session idle past timeout; replacing");
            self.teardown_locked(inner).await;
        }

        self.params
            .require_all(self.factory.required_params())
            .and_then(|()| self.factory.validate(&self.params))
            .map_err(|e| {
                warn!(error = %e, "Invalid connection parameters");
                ClassifiedError::from(e)
            })?;

        inner.generation += 1;
        let generation = inner.generation;
        self.set_state(LifecycleState::Acquiring);
        bump(&self.stats.workers_spawned);
        debug!(generation, "Creating session");

        let factory = Arc::clone(&self.factory);
        let params = Arc::clone(&self.params);
        let outcome = self
            .runner
            .run_tagged(
                "connect",
                generation,
                cancel,
                Some(inner.stale_tx.clone()),
                move |interrupt| factory.connect(&params, interrupt),
            )
            .await;

        match outcome {
            Ok(session) => {
                let now = self.clock.now();
                let slot = SessionSlot {
                    session: Arc::new(session),
                    generation,
                    created_at: now,
                    last_touched: now,
                };
                let lease = slot.lease();
                inner.slot = Some(slot);
                bump(&self.stats.sessions_created);
                self.set_state(LifecycleState::Active);
                info!(generation, "Session established");
                Ok(lease)
            }
            Err(failure) => {
                self.set_state(LifecycleState::Idle);
                let err = self.classifier.classify_failure(&failure);
                if err.is_cancelled() {
                    debug!(generation, "Session creation cancelled");
                } else {
                    warn!(generation, error = %err, class = err.label(), "Session creation failed");
                }
                Err(err)
            }
        }
    }

    async fn teardown_locked(&self, inner: &mut Inner<F>) {
        let Some(slot) = inner.slot.take() else {
            return;
        };
        self.set_state(LifecycleState::Releasing);

        let lifetime = self.clock.now() - slot.created_at;
        if self.teardown_session(slot.generation, slot.session).await {
            debug!(
                generation = slot.generation,
                lifetime_secs = lifetime.num_seconds(),
                "Session torn down"
            );
        }

        self.set_state(LifecycleState::Idle);
    }

    /// Tears one session down on a worker, bounded by the teardown timeout.
    ///
    /// Returns true on success; failures are counted and logged only.
    async fn teardown_session(&self, generation: u64, session: Arc<F::Session>) -> bool {
        let factory = Arc::clone(&self.factory);
        let never = CancelToken::new();

        bump(&self.stats.workers_spawned);
        let teardown = self
            .runner
            .run("teardown", &never, move |_| factory.teardown(&session));

        match tokio::time::timeout(self.settings.teardown_timeout, teardown).await {
            Ok(Ok(())) => true,
            Ok(Err(failure)) => {
                bump(&self.stats.teardown_failures);
                let err = self.classifier.classify_failure(&failure);
                warn!(generation, error = %err, "Session teardown failed; discarding session");
                false
            }
            Err(_) => {
                bump(&self.stats.teardown_failures);
                warn!(
                    generation,
                    timeout = ?self.settings.teardown_timeout,
                    "Session teardown timed out; abandoning worker"
                );
                false
            }
        }
    }

    /// Drops the live session at once and tears it down in the background.
    ///
    /// Used when a worker was abandoned mid-exchange: that worker may still
    /// hold the session, so the caller must not wait on its teardown.
    fn discard_locked(&self, inner: &mut Inner<F>) {
        let Some(slot) = inner.slot.take() else {
            return;
        };
        self.set_state(LifecycleState::Idle);

        let generation = slot.generation;
        let factory = Arc::clone(&self.factory);
        let session = slot.session;
        bump(&self.stats.workers_spawned);
        tokio::task::spawn_blocking(move || match factory.teardown(&session) {
            Ok(()) => debug!(generation, "Discarded session torn down"),
            Err(e) => debug!(generation, error = %e, "Discarded session teardown failed"),
        });
    }

    /// Marks `generation` unusable and discards it now if the lock is free.
    fn poison(&self, generation: u64) {
        self.poisoned.store(generation, Ordering::Release);
        if let Ok(mut inner) = self.inner.try_lock() {
            self.discard_poisoned(&mut inner);
        }
    }

    fn discard_poisoned(&self, inner: &mut Inner<F>) {
        let poisoned = self.poisoned.swap(0, Ordering::AcqRel);
        if poisoned != 0 && inner.slot.as_ref().is_some_and(|slot| slot.generation == poisoned) {
            self.discard_locked(inner);
        }
    }

    async fn invalidate(&self, generation: u64, cancel: &CancelToken) {
        let Ok(mut inner) = self.lock(cancel).await else {
            return;
        };
        if inner.slot.as_ref().is_some_and(|slot| slot.generation == generation) {
            info!(generation, "Invalidating session");
            self.teardown_locked(&mut inner).await;
        }
    }

    fn touch(&self, generation: u64) {
        if let Ok(mut inner) = self.inner.try_lock() {
            touch_slot(&mut *inner, generation, self.clock.now());
        }
    }

    async fn drain_stale(&self, inner: &mut Inner<F>) {
        while let Ok(abandoned) = inner.stale_rx.try_recv() {
            bump(&self.stats.stale_discarded);
            debug!(
                generation = abandoned.generation,
                current = inner.generation,
                succeeded = abandoned.result.is_ok(),
                "Discarding result of abandoned worker"
            );
            if let Ok(session) = abandoned.result {
                if self.teardown_session(abandoned.generation, Arc::new(session)).await {
                    debug!(generation = abandoned.generation, "Stale session torn down");
                }
            }
        }
    }

    fn is_expired(&self, slot: &SessionSlot<F::Session>, now: DateTime<Utc>) -> bool {
        now >= saturating_add(slot.last_touched, self.settings.idle_timeout)
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            trace!(from = %previous, to = %state, "Lifecycle transition");
        }
    }
}

fn touch_slot<S, E>(inner: &mut Lifecycle<S, E>, generation: u64, now: DateTime<Utc>) {
    if let Some(slot) = inner.slot.as_mut().filter(|slot| slot.generation == generation) {
        slot.last_touched = now;
    }
}
