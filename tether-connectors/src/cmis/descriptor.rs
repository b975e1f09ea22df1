//! CMIS connector descriptor.

use crate::descriptor::{CliConfig, ConnectorDescriptor, ConnectorKind, ParamSpec};

use super::client::params;

const CMIS_PARAMS: &[ParamSpec] = &[
    ParamSpec::required(params::BINDING, "Binding type: atom or ws"),
    ParamSpec::required(params::USERNAME, "Repository user"),
    ParamSpec::required(params::PASSWORD, "Repository password").secret(),
    ParamSpec::required(params::ENDPOINT, "Service document or web-services URL"),
    ParamSpec::optional(params::REPOSITORY_ID, "Repository to open; first listed when unset"),
];

/// Returns the CMIS connector descriptor.
pub fn cmis_descriptor() -> ConnectorDescriptor {
    ConnectorDescriptor {
        kind: ConnectorKind::Cmis,
        display_name: "CMIS",
        description: "Content Management Interoperability Services repository",
        params: CMIS_PARAMS,
        cli: cmis_cli_config(),
    }
}

fn cmis_cli_config() -> CliConfig {
    CliConfig {
        name: "cmis",
        aliases: &["alfresco"],
    }
}
