// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `Tether` Session
//!
//! Session lifecycle management for connectors whose client library is
//! synchronous, may hang, and reports its own error types.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 SessionManager                 │
//! │   acquire · check_healthy · execute · release  │
//! │                 (async mutex)                  │
//! └───────────────┬──────────────────┬─────────────┘
//!                 │                  │
//!       ┌─────────▼───────┐   ┌──────▼────────┐
//!       │ OperationRunner │   │ErrorClassifier│
//!       │ (spawn_blocking)│   │ (source chain)│
//!       └─────────┬───────┘   └───────────────┘
//!                 │
//!      ┌──────────▼──────────┐
//!      │   SessionFactory    │
//!      │  (blocking library) │
//!      └─────────────────────┘
//! ```
//!
//! ## Key Types
//!
//! - [`SessionManager`] - One live session per connector instance
//! - [`OperationRunner`] - Runs blocking calls on abandonable workers
//! - [`ErrorClassifier`] - Maps raw failures to Fatal / Transient / Cancelled
//! - [`SessionSettings`] - Idle timeout, backoff and health retry policy

pub mod classify;
pub mod manager;
pub mod runner;
pub mod settings;

pub use classify::{DEFAULT_TRANSIENT_BACKOFF, ErrorClassifier, GeneralPurpose};
pub use manager::{SessionLease, SessionManager, SessionStats};
pub use runner::{Abandoned, DeadLetters, OperationRunner, RunFailure};
pub use settings::{DEFAULT_IDLE_TIMEOUT, DEFAULT_TEARDOWN_TIMEOUT, HealthRetry, SessionSettings};
