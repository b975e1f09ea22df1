//! Trait definitions for `Tether`.
//!
//! These traits describe a backing client library at the seam where the
//! session manager meets it.

use std::error::Error as StdError;
use std::sync::Arc;

use crate::cancel::Interrupt;
use crate::error::CoreError;
use crate::models::{ConnectionParams, ErrorKind};

/// Maps a library's concrete error types onto [`ErrorKind`] tags.
///
/// Implementations usually `downcast_ref` to the library's own types and
/// return `None` for anything they do not recognize. The classifier walks
/// the whole `source()` chain and consults the taxonomy for every link.
pub trait ErrorTaxonomy: Send + Sync {
    /// Returns the tag for one error in a chain, if known.
    fn kind_of(&self, error: &(dyn StdError + 'static)) -> Option<ErrorKind>;
}

/// A synchronous client library that produces sessions.
///
/// Every method here may block, possibly forever. The session manager only
/// ever calls them from an isolated worker, so implementations can use the
/// library in the most direct way.
///
/// ## Implementing a Factory
///
/// ```ignore
/// struct RepoFactory;
///
/// impl SessionFactory for RepoFactory {
///     type Session = RepoSession;
///     type Error = RepoError;
///
///     fn name(&self) -> &str { "repo" }
///
///     fn required_params(&self) -> &'static [&'static str] {
///         &["endpoint", "username"]
///     }
///
///     fn connect(&self, params: &ConnectionParams, _: &Interrupt) -> Result<RepoSession, RepoError> {
///         RepoSession::open(params.require("endpoint")?)
///     }
///
///     fn check(&self, session: &RepoSession, _: &Interrupt) -> Result<(), RepoError> {
///         session.repository_info().map(|_| ())
///     }
///
///     fn teardown(&self, session: &RepoSession) -> Result<(), RepoError> {
///         session.close()
///     }
///
///     fn taxonomy(&self) -> Arc<dyn ErrorTaxonomy> {
///         Arc::new(RepoTaxonomy)
///     }
/// }
/// ```
pub trait SessionFactory: Send + Sync + 'static {
    /// The live session handle.
    type Session: Send + Sync + 'static;

    /// The library's error type.
    type Error: StdError + Send + Sync + 'static;

    /// Short name used in log messages (e.g., "cmis").
    fn name(&self) -> &str;

    /// Parameters that must be present before a session is attempted.
    fn required_params(&self) -> &'static [&'static str];

    /// Further parameter checks that need no I/O.
    ///
    /// Runs after the required-parameter check and before any worker is
    /// spawned; an error here is always fatal.
    fn validate(&self, params: &ConnectionParams) -> Result<(), CoreError> {
        let _ = params;
        Ok(())
    }

    /// Opens a new session.
    fn connect(
        &self,
        params: &ConnectionParams,
        interrupt: &Interrupt,
    ) -> Result<Self::Session, Self::Error>;

    /// Performs a lightweight round trip against a live session.
    fn check(&self, session: &Self::Session, interrupt: &Interrupt) -> Result<(), Self::Error>;

    /// Closes a session.
    fn teardown(&self, session: &Self::Session) -> Result<(), Self::Error>;

    /// Returns the mapping table for this library's errors.
    fn taxonomy(&self) -> Arc<dyn ErrorTaxonomy>;
}
