// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `Tether` Fetch
//!
//! Gates byte-level fetches per logical resource bin.
//!
//! A connector asks the [`FetchPermitGate`] for a permit immediately before
//! it transfers data from an endpoint. The gate enforces each bin's
//! concurrency and start rate; the permit's [`StreamThrottle`] enforces its
//! byte rate.
//!
//! ## Example
//!
//! ```ignore
//! let gate = FetchPermitGate::new(ThrottleSpec::new(2));
//! let permit = gate.acquire_permit("repo.example.com", Wait::Blocking, &cancel).await?;
//! let reader = ThrottledRead::new(body, permit.throttle().clone());
//! // ... read ...
//! permit.release();
//! ```
//!
//! ## Key Types
//!
//! - [`FetchPermitGate`] - Per-bin permits
//! - [`FetchPermit`] - Scoped grant for one fetch
//! - [`ThrottleSpec`] - Concurrency, start interval and byte rate
//! - [`StreamThrottle`], [`ThrottledRead`] - Byte pacing

pub mod error;
pub mod gate;
pub mod permit;
pub mod stream;
pub mod throttle;

pub use error::{PermitError, ThrottleError};
pub use gate::{FetchPermitGate, Wait};
pub use permit::FetchPermit;
pub use stream::{READ_CHUNK, StreamThrottle, ThrottledRead};
pub use throttle::{DEFAULT_MAX_CONCURRENT, ThrottleSpec};
