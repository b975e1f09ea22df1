//! Session lifecycle state.

use serde::{Deserialize, Serialize};

/// The state of a session manager.
///
/// Exactly one state holds at a time; transitions are serialized by the
/// manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No session.
    #[default]
    Idle,
    /// A session-creation worker is in flight.
    Acquiring,
    /// A session is usable.
    Active,
    /// A health check is in flight.
    Checking,
    /// A teardown is in flight.
    Releasing,
}

impl LifecycleState {
    /// Returns a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Acquiring => "Acquiring",
            Self::Active => "Active",
            Self::Checking => "Checking",
            Self::Releasing => "Releasing",
        }
    }

    /// Returns true while a worker is running on behalf of the manager.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Acquiring | Self::Checking | Self::Releasing)
    }

    /// Returns true if a session exists in this state.
    pub fn has_session(&self) -> bool {
        matches!(self, Self::Active | Self::Checking | Self::Releasing)
    }

    /// Returns all states.
    pub fn all() -> &'static [LifecycleState] {
        &[
            Self::Idle,
            Self::Acquiring,
            Self::Active,
            Self::Checking,
            Self::Releasing,
        ]
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
