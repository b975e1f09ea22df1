//! Configuration model.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::ConnectionParams;
use tether_fetch::{DEFAULT_MAX_CONCURRENT, FetchPermitGate, ThrottleSpec};
use tether_session::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_TEARDOWN_TIMEOUT, DEFAULT_TRANSIENT_BACKOFF, HealthRetry,
    SessionSettings,
};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::persistence::{load_json, save_json};

// ============================================================================
// Config
// ============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Fetch throttling.
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Named connections.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl Config {
    /// Loads configuration from `path`; a missing file gives defaults.
    pub async fn load_from(path: &Path) -> Result<Self, StoreError> {
        match load_json::<Self>(path).await {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    connections = config.connections.len(),
                    "Loaded configuration"
                );
                Ok(config)
            }
            Err(e) if e.is_not_found() => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Saves configuration to `path`.
    pub async fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        save_json(path, self).await?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Looks up a named connection.
    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig, StoreError> {
        self.connections
            .get(name)
            .ok_or_else(|| StoreError::ConnectionNotFound(name.to_string()))
    }

    /// Adds a connection; fails if the name is taken.
    pub fn add_connection(
        &mut self,
        name: impl Into<String>,
        connection: ConnectionConfig,
    ) -> Result<(), StoreError> {
        let name = name.into();
        if self.connections.contains_key(&name) {
            return Err(StoreError::ConnectionExists(name));
        }
        self.connections.insert(name, connection);
        Ok(())
    }

    /// Removes a connection.
    pub fn remove_connection(&mut self, name: &str) -> Result<ConnectionConfig, StoreError> {
        self.connections
            .remove(name)
            .ok_or_else(|| StoreError::ConnectionNotFound(name.to_string()))
    }
}

// ============================================================================
// General
// ============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    #[default]
    Warn,
    /// Informational messages.
    Info,
    /// Debug messages.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// Returns the `tracing` filter directive.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level when neither `--verbose` nor `--quiet` is given.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Seconds between maintenance polls in watch mode.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl GeneralConfig {
    /// Returns the poll interval, at least one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session is released, in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Backoff added to transient failures, in milliseconds.
    #[serde(default = "default_transient_backoff_ms")]
    pub transient_backoff_ms: u64,
    /// Health check retry policy.
    #[serde(default)]
    pub health_retry: HealthRetry,
    /// Longest a caller waits for teardown, in milliseconds.
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn default_idle_timeout_ms() -> u64 {
    millis(DEFAULT_IDLE_TIMEOUT)
}

fn default_transient_backoff_ms() -> u64 {
    millis(DEFAULT_TRANSIENT_BACKOFF)
}

fn default_teardown_timeout_ms() -> u64 {
    millis(DEFAULT_TEARDOWN_TIMEOUT)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            transient_backoff_ms: default_transient_backoff_ms(),
            health_retry: HealthRetry::default(),
            teardown_timeout_ms: default_teardown_timeout_ms(),
        }
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        SessionSettings::new()
            .with_idle_timeout(Duration::from_millis(config.idle_timeout_ms))
            .with_transient_backoff(Duration::from_millis(config.transient_backoff_ms))
            .with_health_retry(config.health_retry)
            .with_teardown_timeout(Duration::from_millis(config.teardown_timeout_ms))
    }
}

// ============================================================================
// Throttle
// ============================================================================

/// Limits for one bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinConfig {
    /// Fetches that may run at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum milliseconds between fetch starts.
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Byte rate; absent means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_per_second: Option<u64>,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

impl Default for BinConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_interval_ms: 0,
            bytes_per_second: None,
        }
    }
}

impl From<&BinConfig> for ThrottleSpec {
    fn from(config: &BinConfig) -> Self {
        let spec = ThrottleSpec::new(config.max_concurrent)
            .with_min_interval(Duration::from_millis(config.min_interval_ms));
        match config.bytes_per_second {
            Some(rate) => spec.with_bytes_per_second(rate),
            None => spec,
        }
    }
}

/// Fetch throttling for all bins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Limits for bins without an override.
    #[serde(default)]
    pub default: BinConfig,
    /// Per-bin overrides keyed by bin name.
    #[serde(default)]
    pub bins: HashMap<String, BinConfig>,
}

impl ThrottleConfig {
    /// Builds a permit gate with these limits.
    pub fn build_gate(&self) -> FetchPermitGate {
        self.bins.iter().fold(
            FetchPermitGate::new(ThrottleSpec::from(&self.default)),
            |gate, (bin, config)| gate.with_bin(bin.clone(), ThrottleSpec::from(config)),
        )
    }
}

// ============================================================================
// Connections
// ============================================================================

/// One named connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connector CLI name (e.g., "cmis").
    pub connector: String,
    /// Connection parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Creates a connection for `connector` with no parameters.
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Returns the parameters in the form connectors take.
    pub fn connection_params(&self) -> ConnectionParams {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
