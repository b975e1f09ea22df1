//! Error capability tags.

use serde::{Deserialize, Serialize};

/// What a raw library error represents, independent of its concrete type.
///
/// Each backing library supplies a mapping from its own error types onto
/// these tags; the classifier only ever looks at the tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The calling flow was asked to stop.
    Interrupted,
    /// A required parameter is missing or malformed.
    Configuration,
    /// Credentials were rejected and will stay rejected.
    Authentication,
    /// A network-layer failure (refused, reset, timed out).
    Network,
    /// The service is not bound or not reachable yet.
    NotBound,
    /// The remote side failed while handling the request.
    RemoteTransport,
}

impl ErrorKind {
    /// Returns true if this kind signals a retryable condition.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::NotBound | Self::RemoteTransport)
    }

    /// Returns true if this kind requires operator action.
    pub fn is_operator_actionable(&self) -> bool {
        matches!(self, Self::Configuration | Self::Authentication)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Interrupted => "interrupted",
            Self::Configuration => "configuration",
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::NotBound => "not bound",
            Self::RemoteTransport => "remote transport",
        };
        f.write_str(label)
    }
}
