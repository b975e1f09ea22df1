//! Connection parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::CoreError;

/// Immutable name/value parameters describing one remote endpoint.
///
/// Empty values are treated as absent, so a form that submits `""` for a
/// field behaves the same as one that omits it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionParams {
    values: BTreeMap<String, String>,
}

impl ConnectionParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `name` set to `value`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Gets a non-empty parameter value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Gets a parameter value, falling back to `default`.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Gets a parameter that must be present.
    pub fn require(&self, name: &str) -> Result<&str, CoreError> {
        self.get(name)
            .ok_or_else(|| CoreError::MissingParameter(name.to_string()))
    }

    /// Checks that every named parameter is present, reporting the first gap.
    pub fn require_all(&self, names: &[&str]) -> Result<(), CoreError> {
        for name in names {
            self.require(name)?;
        }
        Ok(())
    }

    /// Returns true if the parameter is present and non-empty.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over all parameters, including empty ones.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns true if values under this name must not be displayed.
    pub fn is_secret(name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        lower.contains("password") || lower.contains("secret")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectionParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.values {
            if Self::is_secret(name) && !value.is_empty() {
                map.entry(name, &"********");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectionParams {
        ConnectionParams::new()
            .with("endpoint", "http://repo.local/atom")
            .with("username", "admin")
            .with("password", "hunter2")
            .with("repositoryId", "")
    }

    #[test]
    fn test_empty_value_is_absent() {
        let params = sample();
        assert_eq!(params.get("repositoryId"), None);
        assert!(!params.contains("repositoryId"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_require_all_reports_first_missing() {
        let params = sample();
        assert!(params.require_all(&["endpoint", "username"]).is_ok());

        let err = params
            .require_all(&["endpoint", "binding", "repositoryId"])
            .unwrap_err();
        assert!(matches!(err, CoreError::MissingParameter(ref name) if name == "binding"));
    }

    #[test]
    fn test_get_or_default() {
        let params = sample();
        assert_eq!(params.get_or("port", "27017"), "27017");
        assert_eq!(params.get_or("username", "guest"), "admin");
    }

    #[test]
    fn test_debug_masks_secrets() {
        let rendered = format!("{:?}", sample());
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("********"));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["username"], "admin");

        let parsed: ConnectionParams = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, sample());
    }
}
