//! JSON output formatting.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_connectors::{CheckStatus, ConnectorDescriptor};
use tether_core::LifecycleState;
use tether_session::SessionStats;

// ============================================================================
// Output Types
// ============================================================================

/// JSON output for one connection check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutput {
    pub connection: String,
    pub connector: String,
    pub bin: String,
    #[serde(flatten)]
    pub status: CheckStatus,
    /// Human-readable form of `status`.
    pub summary: String,
    pub state: LifecycleState,
    pub checked_at: DateTime<Utc>,
}

/// JSON output for one sample fetch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleOutput {
    pub connection: String,
    pub bin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
    pub stats: SessionStats,
}

/// Connector info output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorInfoOutput {
    pub id: String,
    pub display_name: String,
    pub cli_name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub params: Vec<ParamOutput>,
}

/// Connector parameter output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamOutput {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

// ============================================================================
// JSON Formatter
// ============================================================================

/// JSON formatter.
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    /// Creates a new JSON formatter.
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Formats any serializable value.
    pub fn format<T: Serialize>(&self, data: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(data)?
        } else {
            serde_json::to_string(data)?
        };
        Ok(json)
    }

    /// Formats check results; a single result is not wrapped in an array.
    pub fn format_checks(&self, checks: &[CheckOutput]) -> Result<String> {
        if let [single] = checks {
            self.format(single)
        } else {
            self.format(&checks)
        }
    }

    /// Formats the connector list.
    pub fn format_connectors(&self, connectors: &[ConnectorDescriptor]) -> Result<String> {
        let outputs: Vec<ConnectorInfoOutput> = connectors.iter().map(connector_info).collect();
        self.format(&outputs)
    }
}

fn connector_info(desc: &ConnectorDescriptor) -> ConnectorInfoOutput {
    ConnectorInfoOutput {
        id: desc.kind.as_str().to_string(),
        display_name: desc.display_name().to_string(),
        cli_name: desc.cli_name().to_string(),
        aliases: desc.cli.aliases.iter().map(ToString::to_string).collect(),
        description: desc.description.to_string(),
        params: desc
            .params
            .iter()
            .map(|p| ParamOutput {
                name: p.name.to_string(),
                description: p.description.to_string(),
                required: p.required,
                secret: p.secret,
                default: p.default.map(ToString::to_string),
            })
            .collect(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_connectors::ConnectorRegistry;

    fn check(connection: &str, status: CheckStatus) -> CheckOutput {
        CheckOutput {
            connection: connection.to_string(),
            connector: "mongodb".to_string(),
            bin: "db1:27017".to_string(),
            summary: status.to_string(),
            status,
            state: LifecycleState::Idle,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_format_pretty() {
        let formatter = JsonFormatter::new(true);
        let data = serde_json::json!({"key": "value"});
        let output = formatter.format(&data).unwrap();
        assert!(output.contains('\n'));
    }

    #[test]
    fn test_format_compact() {
        let formatter = JsonFormatter::new(false);
        let data = serde_json::json!({"key": "value"});
        let output = formatter.format(&data).unwrap();
        assert!(!output.contains('\n'));
    }

    #[test]
    fn test_check_output_flattens_status() {
        let formatter = JsonFormatter::new(false);
        let output = formatter
            .format_checks(&[check(
                "archive",
                CheckStatus::Failed {
                    message: "Parameter database required but not set".to_string(),
                },
            )])
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["connection"], "archive");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["message"], "Parameter database required but not set");
        assert!(value["checkedAt"].is_string());
    }

    #[test]
    fn test_multiple_checks_are_an_array() {
        let formatter = JsonFormatter::new(false);
        let output = formatter
            .format_checks(&[
                check("a", CheckStatus::Working),
                check("b", CheckStatus::Cancelled),
            ])
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
        assert_eq!(value[1]["status"], "cancelled");
    }

    #[test]
    fn test_connector_info() {
        let desc = ConnectorRegistry::get_by_cli_name("cmis").unwrap();
        let info = connector_info(desc);
        assert_eq!(info.cli_name, "cmis");
        let password = info.params.iter().find(|p| p.name == "password").unwrap();
        assert!(password.secret);
        assert!(password.required);
    }
}
