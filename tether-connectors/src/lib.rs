// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `Tether` Connectors
//!
//! Connector implementations on top of the session manager.
//!
//! Each connector pairs a [`SessionFactory`](tether_core::SessionFactory)
//! for its backing library with a static [`ConnectorDescriptor`]. The
//! [`ConnectorRegistry`] opens any of them as a [`ManagedConnector`].
//!
//! ## Connectors
//!
//! | Connector | Sessions | Health check |
//! |-----------|----------|--------------|
//! | `cmis`    | AtomPub service document or SOAP repository service | Repository still listed |
//! | `mongodb` | TCP connection, SCRAM-SHA-256 when a user is set | `ping` command |
//!
//! ## Key Types
//!
//! - [`ConnectorRegistry`] - Static descriptors and connector construction
//! - [`Connector`] - Session manager plus fetch permits for one endpoint
//! - [`CheckStatus`] - Outcome of a connectivity test

pub mod cmis;
pub mod connector;
pub mod descriptor;
pub mod mongodb;
pub mod registry;

pub use connector::{CheckStatus, Connector, FetchTarget, ManagedConnector};
pub use descriptor::{CliConfig, ConnectorDescriptor, ConnectorKind, ParamSpec};
pub use registry::ConnectorRegistry;
