// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `Tether` Core
//!
//! Core types, models, and traits shared by every `Tether` crate.
//!
//! A connector talks to its remote service through a synchronous client
//! library. This crate describes that library at its seam:
//!
//! - [`SessionFactory`] - how to open, check and tear down a session
//! - [`ErrorTaxonomy`] - how the library's errors map onto [`ErrorKind`] tags
//! - [`ClassifiedError`] - the only failure shape that leaves a session manager
//!
//! ## Key Types
//!
//! ### Connection
//! - [`ConnectionParams`] - Immutable connection parameters
//! - [`LifecycleState`] - Session manager state
//!
//! ### Errors
//! - [`ClassifiedError`] - Fatal / Transient / Cancelled
//! - [`ErrorKind`] - Capability tags populated per backing library
//! - [`CoreError`] - Parameter and configuration errors
//!
//! ### Cooperative Cancellation
//! - [`CancelToken`] - Caller-side cancellation signal
//! - [`Interrupt`] - Worker-side interruption request
//!
//! ### Time
//! - [`Clock`], [`SystemClock`], [`ManualClock`]

pub mod cancel;
pub mod clock;
pub mod error;
pub mod models;
pub mod traits;

// Re-export error types
pub use error::{ClassifiedError, CoreError};

// Re-export model types
pub use models::{ConnectionParams, ErrorKind, LifecycleState};

// Re-export cancellation and time
pub use cancel::{CancelToken, Interrupt};
pub use clock::{Clock, ManualClock, SystemClock};

// Re-export traits
pub use traits::{ErrorTaxonomy, SessionFactory};
