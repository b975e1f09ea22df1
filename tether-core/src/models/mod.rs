//! Domain models for `Tether`.
//!
//! - [`params`] - Connection parameters
//! - [`state`] - Session lifecycle state
//! - [`kind`] - Error capability tags

pub mod kind;
pub mod params;
pub mod state;

pub use kind::ErrorKind;
pub use params::ConnectionParams;
pub use state::LifecycleState;
