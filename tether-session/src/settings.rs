//! Session manager settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classify::DEFAULT_TRANSIENT_BACKOFF;

/// Default idle time after which a session expires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Default bound on how long a caller waits for teardown.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How `check_healthy` reacts to a transient failure of a prior session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthRetry {
    /// Discard the session and make one fresh acquire and check.
    #[default]
    FreshAttempt,
    /// Keep discarding and reacquiring until success, a fatal error or
    /// cancellation.
    UntilSettled,
}

/// Settings for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Idle time after which a session is torn down.
    pub idle_timeout: Duration,
    /// Backoff added to the retry time of transient failures.
    pub transient_backoff: Duration,
    /// Health check retry policy.
    pub health_retry: HealthRetry,
    /// Longest a caller waits for teardown before abandoning it.
    pub teardown_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            transient_backoff: DEFAULT_TRANSIENT_BACKOFF,
            health_retry: HealthRetry::default(),
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}

impl SessionSettings {
    /// Creates default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the transient backoff.
    #[must_use]
    pub fn with_transient_backoff(mut self, backoff: Duration) -> Self {
        self.transient_backoff = backoff;
        self
    }

    /// Sets the health retry policy.
    #[must_use]
    pub fn with_health_retry(mut self, policy: HealthRetry) -> Self {
        self.health_retry = policy;
        self
    }

    /// Sets the teardown timeout.
    #[must_use]
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.idle_timeout, Duration::from_secs(300));
        assert_eq!(settings.transient_backoff, Duration::from_secs(60));
        assert_eq!(settings.health_retry, HealthRetry::FreshAttempt);
    }

    #[test]
    fn test_health_retry_serde() {
        let json = serde_json::to_string(&HealthRetry::UntilSettled).unwrap();
        assert_eq!(json, "\"until_settled\"");
    }
}
