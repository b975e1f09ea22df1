//! Connector facade.
//!
//! A [`Connector`] ties one [`SessionManager`] to the shared
//! [`FetchPermitGate`]. The [`ManagedConnector`] trait erases the factory
//! type so the registry can hand out connectors of any kind.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_core::{
    CancelToken, ClassifiedError, ConnectionParams, Interrupt, LifecycleState, SessionFactory,
};
use tether_fetch::{FetchPermitGate, PermitError, StreamThrottle, Wait};
use tether_session::{SessionManager, SessionStats};
use tracing::{debug, info, instrument, warn};

use crate::descriptor::ConnectorDescriptor;

// ============================================================================
// Fetch Target
// ============================================================================

/// The byte-level side of a session factory.
pub trait FetchTarget: SessionFactory {
    /// Names the bin fetches against these parameters are throttled in.
    fn bin_name(params: &ConnectionParams) -> String;

    /// Reads a small response through `throttle` and returns the bytes read.
    fn sample(
        session: &Self::Session,
        throttle: &StreamThrottle,
        interrupt: &Interrupt,
    ) -> Result<u64, Self::Error>;
}

// ============================================================================
// Check Status
// ============================================================================

/// Outcome of a connectivity test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    /// The repository answered.
    Working,
    /// The repository is temporarily unavailable.
    TemporarilyFailed {
        /// What went wrong.
        message: String,
        /// Earliest time a retry makes sense.
        retry_after: DateTime<Utc>,
    },
    /// The connection cannot work without operator action.
    Failed {
        /// What went wrong.
        message: String,
    },
    /// The check was abandoned.
    Cancelled,
}

impl CheckStatus {
    /// Returns true for `Working`.
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Working)
    }
}

impl From<Result<(), ClassifiedError>> for CheckStatus {
    fn from(outcome: Result<(), ClassifiedError>) -> Self {
        match outcome {
            Ok(()) => Self::Working,
            Err(ClassifiedError::Transient {
                message,
                retry_after,
            }) => Self::TemporarilyFailed {
                message,
                retry_after,
            },
            Err(ClassifiedError::Fatal { message }) => Self::Failed { message },
            Err(ClassifiedError::Cancelled) => Self::Cancelled,
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Working => f.write_str("Connection working"),
            Self::TemporarilyFailed { message, .. } => {
                write!(f, "Connection temporarily failed: {message}")
            }
            Self::Failed { message } => write!(f, "Connection failed: {message}"),
            Self::Cancelled => f.write_str("Connection check cancelled"),
        }
    }
}

// ============================================================================
// Managed Connector
// ============================================================================

/// A connector of any kind.
#[async_trait]
pub trait ManagedConnector: Send + Sync + fmt::Debug {
    /// Returns the static description.
    fn descriptor(&self) -> &ConnectorDescriptor;

    /// Returns the bin this connector's fetches are throttled in.
    fn bin_name(&self) -> &str;

    /// Returns the lifecycle state.
    fn state(&self) -> LifecycleState;

    /// Returns the lifecycle counters.
    fn stats(&self) -> SessionStats;

    /// Tests connectivity.
    async fn check(&self, cancel: &CancelToken) -> CheckStatus;

    /// Periodic maintenance; returns true if an idle session was released.
    async fn poll(&self) -> bool;

    /// Releases the session.
    async fn disconnect(&self);

    /// Performs one throttled sample fetch and returns the bytes read.
    async fn sample(&self, cancel: &CancelToken, wait: Wait) -> Result<u64, ClassifiedError>;
}

// ============================================================================
// Connector
// ============================================================================

/// A session manager plus fetch throttling for one endpoint.
pub struct Connector<F: FetchTarget> {
    descriptor: ConnectorDescriptor,
    manager: Arc<SessionManager<F>>,
    gate: Arc<FetchPermitGate>,
    bin: String,
}

impl<F: FetchTarget> fmt::Debug for Connector<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("kind", &self.descriptor.kind)
            .field("bin", &self.bin)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl<F: FetchTarget> Connector<F> {
    /// Creates a connector around `manager`.
    pub fn new(
        descriptor: ConnectorDescriptor,
        manager: SessionManager<F>,
        gate: Arc<FetchPermitGate>,
    ) -> Self {
        let bin = F::bin_name(manager.params());
        Self {
            descriptor,
            manager: Arc::new(manager),
            gate,
            bin,
        }
    }

    /// Returns the session manager.
    pub fn manager(&self) -> &Arc<SessionManager<F>> {
        &self.manager
    }

    /// Runs `op` against the session under a fetch permit for this bin.
    ///
    /// The session is acquired first, so a slow connect never holds bin
    /// capacity. The permit covers only the library call and is released
    /// whatever the outcome, and also if the returned future is dropped.
    #[instrument(skip(self, cancel, op), fields(bin = %self.bin))]
    pub async fn fetch<T, Op>(
        &self,
        cancel: &CancelToken,
        wait: Wait,
        op: Op,
    ) -> Result<T, ClassifiedError>
    where
        Op: FnOnce(&F::Session, &StreamThrottle, &Interrupt) -> Result<T, F::Error> + Send + 'static,
        T: Send + 'static,
    {
        let lease = self.manager.acquire(cancel).await?;
        let permit = self
            .gate
            .acquire_permit(&self.bin, wait, cancel)
            .await
            .map_err(|err| self.permit_error(err))?;
        let throttle = permit.throttle().clone();

        let result = self
            .manager
            .run_on(lease, cancel, move |session, interrupt| {
                op(session, &throttle, interrupt)
            })
            .await;
        permit.release();
        result
    }

    fn permit_error(&self, err: PermitError) -> ClassifiedError {
        match err {
            PermitError::Cancelled(_) => ClassifiedError::Cancelled,
            PermitError::DeadlineElapsed(_) => {
                warn!(bin = %self.bin, "No fetch permit before the deadline");
                self.manager.classifier().service_interruption(err.to_string())
            }
            PermitError::Closed => ClassifiedError::fatal(err.to_string()),
        }
    }
}

#[async_trait]
impl<F: FetchTarget> ManagedConnector for Connector<F> {
    fn descriptor(&self) -> &ConnectorDescriptor {
        &self.descriptor
    }

    fn bin_name(&self) -> &str {
        &self.bin
    }

    fn state(&self) -> LifecycleState {
        self.manager.state()
    }

    fn stats(&self) -> SessionStats {
        self.manager.stats()
    }

    async fn check(&self, cancel: &CancelToken) -> CheckStatus {
        let status = CheckStatus::from(self.manager.check_healthy(cancel).await);
        match &status {
            CheckStatus::Working | CheckStatus::Cancelled => {
                debug!(connector = %self.descriptor.kind, %status, "Connection check finished");
            }
            _ => info!(connector = %self.descriptor.kind, %status, "Connection check finished"),
        }
        status
    }

    async fn poll(&self) -> bool {
        self.manager.maybe_expire().await
    }

    async fn disconnect(&self) {
        self.manager.release().await;
    }

    async fn sample(&self, cancel: &CancelToken, wait: Wait) -> Result<u64, ClassifiedError> {
        self.fetch(cancel, wait, |session, throttle, interrupt| {
            F::sample(session, throttle, interrupt)
        })
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status_messages() {
        assert_eq!(CheckStatus::from(Ok(())).to_string(), "Connection working");
        assert_eq!(
            CheckStatus::from(Err(ClassifiedError::fatal("Parameter endpoint required but not set")))
                .to_string(),
            "Connection failed: Parameter endpoint required but not set"
        );
        assert_eq!(
            CheckStatus::from(Err(ClassifiedError::transient("503", Utc::now()))).to_string(),
            "Connection temporarily failed: 503"
        );
        assert_eq!(
            CheckStatus::from(Err(ClassifiedError::Cancelled)).to_string(),
            "Connection check cancelled"
        );
    }

    #[test]
    fn test_check_status_serializes_tag() {
        let json = serde_json::to_value(CheckStatus::Failed {
            message: "bad".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "bad");
        assert!(!CheckStatus::Cancelled.is_working());
    }
}
