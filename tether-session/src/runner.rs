//! Isolated operation runner.
//!
//! Blocking library calls run on a tokio blocking worker. The calling flow
//! waits for the result but can walk away at any time: the worker keeps
//! running, its [`Interrupt`] is raised, and whatever it eventually returns
//! goes to a dead-letter channel instead of back to the caller.

use std::any::Any;
use std::fmt;

use tether_core::{CancelToken, Interrupt};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, trace};

// ============================================================================
// Failure Type
// ============================================================================

/// Why a runner call did not produce a value.
#[derive(Debug)]
pub enum RunFailure<E> {
    /// The operation returned an error.
    Failed(E),
    /// The operation panicked; the payload message is kept.
    Panicked(String),
    /// The caller cancelled before the operation finished.
    Cancelled,
}

impl<E> RunFailure<E> {
    /// Returns true if the caller cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl<E: fmt::Display> fmt::Display for RunFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{e}"),
            Self::Panicked(msg) => write!(f, "worker panicked: {msg}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// The late result of a worker whose caller already gave up.
#[derive(Debug)]
pub struct Abandoned<T, E> {
    /// Generation the worker was started under.
    pub generation: u64,
    /// What the worker produced.
    pub result: Result<T, RunFailure<E>>,
}

/// Sending half of a dead-letter channel.
pub type DeadLetters<T, E> = mpsc::UnboundedSender<Abandoned<T, E>>;

// ============================================================================
// Runner
// ============================================================================

/// Runs blocking operations on isolated workers.
///
/// The runner never retries and never applies a timeout of its own; the
/// caller's [`CancelToken`] is the only way to stop waiting.
#[derive(Debug, Clone)]
pub struct OperationRunner {
    name: String,
}

impl OperationRunner {
    /// Creates a runner; `name` shows up in log fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the runner's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `op` on a blocking worker, discarding any late result.
    pub async fn run<T, E, F>(
        &self,
        label: &'static str,
        cancel: &CancelToken,
        op: F,
    ) -> Result<T, RunFailure<E>>
    where
        F: FnOnce(&Interrupt) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.run_tagged(label, 0, cancel, None, op).await
    }

    /// Runs `op` on a blocking worker.
    ///
    /// If `cancel` fires first, the worker's interrupt is raised and
    /// `RunFailure::Cancelled` is returned at once. The worker's eventual
    /// result is then sent to `dead_letters` tagged with `generation`, or
    /// dropped if no channel was given.
    ///
    /// A token that is already cancelled returns `Cancelled` without
    /// spawning a worker.
    pub async fn run_tagged<T, E, F>(
        &self,
        label: &'static str,
        generation: u64,
        cancel: &CancelToken,
        dead_letters: Option<DeadLetters<T, E>>,
        op: F,
    ) -> Result<T, RunFailure<E>>
    where
        F: FnOnce(&Interrupt) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(RunFailure::Cancelled);
        }

        let interrupt = Interrupt::new();
        let worker_interrupt = interrupt.clone();
        trace!(runner = %self.name, op = label, generation, "Spawning worker");
        let mut handle = tokio::task::spawn_blocking(move || op(&worker_interrupt));

        // Raised if this future is dropped mid-wait.
        let mut guard = InterruptOnDrop(Some(interrupt.clone()));

        tokio::select! {
            biased;
            joined = &mut handle => {
                guard.disarm();
                flatten(joined)
            }
            () = cancel.cancelled() => {
                interrupt.request();
                guard.disarm();
                debug!(runner = %self.name, op = label, generation, "Caller cancelled; abandoning worker");

                let runner = self.name.clone();
                tokio::spawn(async move {
                    let result = flatten(handle.await);
                    match dead_letters {
                        Some(tx) => {
                            let _ = tx.send(Abandoned { generation, result });
                        }
                        None => {
                            debug!(runner = %runner, op = label, generation, "Dropping result of abandoned worker");
                        }
                    }
                });
                Err(RunFailure::Cancelled)
            }
        }
    }
}

struct InterruptOnDrop(Option<Interrupt>);

impl InterruptOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(interrupt) = self.0.take() {
            interrupt.request();
        }
    }
}

fn flatten<T, E>(joined: Result<Result<T, E>, JoinError>) -> Result<T, RunFailure<E>> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RunFailure::Failed(e)),
        Err(join) if join.is_panic() => Err(RunFailure::Panicked(panic_message(&*join.into_panic()))),
        Err(_) => Err(RunFailure::Cancelled),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
