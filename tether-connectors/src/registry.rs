//! Connector registry.
//!
//! The registry provides static access to every connector descriptor and
//! opens connectors by kind.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tether_core::{ConnectionParams, CoreError};
use tether_fetch::FetchPermitGate;
use tether_session::{SessionManager, SessionSettings};
use tracing::debug;

use crate::cmis::{CmisFactory, cmis_descriptor};
use crate::connector::{Connector, ManagedConnector};
use crate::descriptor::{ConnectorDescriptor, ConnectorKind};
use crate::mongodb::{MongoFactory, mongodb_descriptor};

// ============================================================================
// Static Registry
// ============================================================================

/// Static storage for all connector descriptors.
static DESCRIPTORS: OnceLock<Vec<ConnectorDescriptor>> = OnceLock::new();

/// Static storage for CLI name to connector kind mapping.
static CLI_NAME_MAP: OnceLock<HashMap<String, ConnectorKind>> = OnceLock::new();

fn init_descriptors() -> Vec<ConnectorDescriptor> {
    vec![cmis_descriptor(), mongodb_descriptor()]
}

fn build_cli_name_map(descriptors: &[ConnectorDescriptor]) -> HashMap<String, ConnectorKind> {
    let mut map = HashMap::new();
    for desc in descriptors {
        map.insert(desc.cli.name.to_string(), desc.kind);
        for alias in desc.cli.aliases {
            map.insert((*alias).to_string(), desc.kind);
        }
    }
    map
}

// ============================================================================
// Connector Registry
// ============================================================================

/// Global registry of all connector descriptors.
pub struct ConnectorRegistry;

impl ConnectorRegistry {
    /// Returns all connector descriptors.
    pub fn all() -> &'static [ConnectorDescriptor] {
        DESCRIPTORS.get_or_init(init_descriptors)
    }

    /// Gets a connector descriptor by kind.
    pub fn get(kind: ConnectorKind) -> Option<&'static ConnectorDescriptor> {
        Self::all().iter().find(|d| d.kind == kind)
    }

    /// Returns the CLI name to connector kind mapping.
    pub fn cli_name_map() -> &'static HashMap<String, ConnectorKind> {
        CLI_NAME_MAP.get_or_init(|| build_cli_name_map(Self::all()))
    }

    /// Looks up a connector by CLI name or alias.
    pub fn get_by_cli_name(name: &str) -> Option<&'static ConnectorDescriptor> {
        let kind = Self::cli_name_map().get(name)?;
        Self::get(*kind)
    }

    /// Returns the number of registered connectors.
    pub fn count() -> usize {
        Self::all().len()
    }

    /// Opens a connector of `kind`.
    ///
    /// Parameter defaults are filled in here; required parameters are only
    /// checked when a session is first acquired.
    pub fn open(
        kind: ConnectorKind,
        params: &ConnectionParams,
        settings: SessionSettings,
        gate: Arc<FetchPermitGate>,
    ) -> Result<Arc<dyn ManagedConnector>, CoreError> {
        let descriptor = Self::get(kind)
            .ok_or_else(|| CoreError::UnknownConnector(kind.to_string()))?
            .clone();
        let params = descriptor.apply_defaults(params);
        debug!(connector = %kind, ?params, "Opening connector");

        let connector: Arc<dyn ManagedConnector> = match kind {
            ConnectorKind::Cmis => {
                let factory = CmisFactory::new().map_err(|e| CoreError::Other(e.to_string()))?;
                let manager = SessionManager::new(factory, params, settings);
                Arc::new(Connector::new(descriptor, manager, gate))
            }
            ConnectorKind::Mongodb => {
                let manager = SessionManager::new(MongoFactory::new(), params, settings);
                Arc::new(Connector::new(descriptor, manager, gate))
            }
        };
        Ok(connector)
    }

    /// Opens a connector by CLI name or alias.
    pub fn open_by_name(
        name: &str,
        params: &ConnectionParams,
        settings: SessionSettings,
        gate: Arc<FetchPermitGate>,
    ) -> Result<Arc<dyn ManagedConnector>, CoreError> {
        let descriptor =
            Self::get_by_cli_name(name).ok_or_else(|| CoreError::UnknownConnector(name.to_string()))?;
        Self::open(descriptor.kind, params, settings, gate)
    }
}

// ============================================================================
// Tests
// ============================================================================
