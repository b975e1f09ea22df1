//! MongoDB connector implementation.
//!
//! Sessions are plain TCP connections; liveness is a `ping` command sent
//! over the wire protocol. When a username is configured the connection
//! authenticates with SCRAM-SHA-256 before the first ping.

mod descriptor;
mod error;
mod factory;
mod scram;
mod wire;

pub use descriptor::mongodb_descriptor;
pub use error::{ProbeError, ProbeTaxonomy};
pub use factory::{DEFAULT_PORT, MongoFactory, MongoSession, params};
