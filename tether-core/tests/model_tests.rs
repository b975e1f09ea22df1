//! Integration tests for core model types.

use tether_core::{ClassifiedError, ConnectionParams, CoreError, LifecycleState};

#[test]
fn test_params_from_iterator() {
    let params: ConnectionParams = [("host", "db.local"), ("port", "27017")]
        .into_iter()
        .collect();
    assert_eq!(params.require("host").unwrap(), "db.local");
    assert_eq!(params.get("port"), Some("27017"));
}

#[test]
fn test_missing_parameter_is_fatal() {
    let params = ConnectionParams::new().with("database", "");
    let err: ClassifiedError = params.require("database").unwrap_err().into();
    assert_eq!(
        err,
        ClassifiedError::fatal("Parameter database required but not set")
    );
}

#[test]
fn test_unknown_connector_message() {
    let err = CoreError::UnknownConnector("ftp".to_string());
    assert_eq!(err.to_string(), "Unknown connector: ftp");
}

#[test]
fn test_state_serialization() {
    let json = serde_json::to_string(&LifecycleState::Acquiring).unwrap();
    assert_eq!(json, "\"acquiring\"");
    let parsed: LifecycleState = serde_json::from_str("\"active\"").unwrap();
    assert_eq!(parsed, LifecycleState::Active);
}
