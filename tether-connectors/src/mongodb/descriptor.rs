//! MongoDB connector descriptor.

use crate::descriptor::{CliConfig, ConnectorDescriptor, ConnectorKind, ParamSpec};

use super::factory::params;

const MONGODB_PARAMS: &[ParamSpec] = &[
    ParamSpec::required(params::HOST, "Server host").with_default("localhost"),
    ParamSpec::optional(params::PORT, "Server port").with_default("27017"),
    ParamSpec::optional(params::USERNAME, "Database user"),
    ParamSpec::optional(params::PASSWORD, "Database password").secret(),
    ParamSpec::required(params::DATABASE, "Database name"),
    ParamSpec::required(params::COLLECTION, "Collection name"),
];

/// Returns the MongoDB connector descriptor.
pub fn mongodb_descriptor() -> ConnectorDescriptor {
    ConnectorDescriptor {
        kind: ConnectorKind::Mongodb,
        display_name: "MongoDB",
        description: "MongoDB database endpoint",
        params: MONGODB_PARAMS,
        cli: CliConfig {
            name: "mongodb",
            aliases: &["mongo"],
        },
    }
}
