//! CMIS connector implementation.
//!
//! Opens a repository over the AtomPub binding (service document fetched
//! with HTTP basic auth) or the SOAP web-services binding.

mod binding;
mod client;
mod descriptor;
mod error;
pub(crate) mod parser;

pub use binding::{Binding, WS_SERVICES, ws_service_address, ws_service_urls};
pub use client::{CmisFactory, CmisSession, params};
pub use descriptor::cmis_descriptor;
pub use error::{CmisError, CmisTaxonomy};
pub use parser::RepositoryInfo;
