//! Connector descriptor system.
//!
//! A descriptor contains all the static configuration for a connector:
//! - Metadata (display name, description)
//! - The parameters it accepts, with defaults and secrecy
//! - CLI configuration

use serde::{Deserialize, Serialize};
use tether_core::ConnectionParams;

// ============================================================================
// Connector Kind
// ============================================================================

/// All connectors known to `Tether`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    /// CMIS document repository.
    Cmis,
    /// MongoDB database endpoint.
    Mongodb,
}

impl ConnectorKind {
    /// Returns every kind in display order.
    pub fn all() -> &'static [ConnectorKind] {
        &[Self::Cmis, Self::Mongodb]
    }

    /// Returns the lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cmis => "cmis",
            Self::Mongodb => "mongodb",
        }
    }
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Parameter Spec
// ============================================================================

/// One accepted connection parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Parameter name as stored in the configuration.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
    /// Must be present before a session is attempted.
    pub required: bool,
    /// Masked in output.
    pub secret: bool,
    /// Value used when the parameter is absent.
    pub default: Option<&'static str>,
}

impl ParamSpec {
    /// A required parameter.
    pub const fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: true,
            secret: false,
            default: None,
        }
    }

    /// An optional parameter.
    pub const fn optional(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: false,
            secret: false,
            default: None,
        }
    }

    /// Marks the parameter secret.
    #[must_use]
    pub const fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Sets a default value.
    #[must_use]
    pub const fn with_default(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }
}

// ============================================================================
// CLI Config
// ============================================================================

/// Names the connector answers to on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliConfig {
    /// Primary CLI name.
    pub name: &'static str,
    /// Alternative names.
    pub aliases: &'static [&'static str],
}

// ============================================================================
// Connector Descriptor
// ============================================================================

/// Complete static description of a connector.
#[derive(Debug, Clone)]
pub struct ConnectorDescriptor {
    /// Connector identifier.
    pub kind: ConnectorKind,
    /// Human-readable name.
    pub display_name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Accepted parameters.
    pub params: &'static [ParamSpec],
    /// CLI configuration.
    pub cli: CliConfig,
}

impl ConnectorDescriptor {
    /// Returns the display name.
    pub fn display_name(&self) -> &str {
        self.display_name
    }

    /// Returns the CLI name.
    pub fn cli_name(&self) -> &str {
        self.cli.name
    }

    /// Looks up a parameter spec.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Returns the names of required parameters.
    pub fn required_params(&self) -> Vec<&'static str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect()
    }

    /// Fills absent parameters with their defaults.
    pub fn apply_defaults(&self, params: &ConnectionParams) -> ConnectionParams {
        let mut filled = params.clone();
        for spec in self.params {
            if let Some(default) = spec.default {
                if !filled.contains(spec.name) {
                    filled = filled.with(spec.name, default);
                }
            }
        }
        filled
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &[ParamSpec] = &[
        ParamSpec::required("host", "Server host").with_default("localhost"),
        ParamSpec::required("database", "Database name"),
        ParamSpec::optional("password", "Password").secret(),
    ];

    fn descriptor() -> ConnectorDescriptor {
        ConnectorDescriptor {
            kind: ConnectorKind::Mongodb,
            display_name: "Test",
            description: "Test connector",
            params: PARAMS,
            cli: CliConfig {
                name: "test",
                aliases: &[],
            },
        }
    }

    #[test]
    fn test_required_params() {
        assert_eq!(descriptor().required_params(), vec!["host", "database"]);
    }

    #[test]
    fn test_apply_defaults_keeps_explicit_values() {
        let desc = descriptor();
        let filled = desc.apply_defaults(&ConnectionParams::new());
        assert_eq!(filled.get("host"), Some("localhost"));

        let explicit = ConnectionParams::new().with("host", "db.internal");
        assert_eq!(desc.apply_defaults(&explicit).get("host"), Some("db.internal"));
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&ConnectorKind::Mongodb).unwrap();
        assert_eq!(json, "\"mongodb\"");
        assert_eq!(ConnectorKind::Cmis.to_string(), "cmis");
    }
}
