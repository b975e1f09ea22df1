//! CMIS-specific errors.

use std::error::Error as StdError;

use tether_core::{ErrorKind, ErrorTaxonomy};
use tether_fetch::ThrottleError;
use thiserror::Error;

/// CMIS-specific errors.
#[derive(Debug, Error)]
pub enum CmisError {
    /// The binding parameter is neither `atom` nor `ws`.
    #[error("Unknown binding {0}; expected atom or ws")]
    UnknownBinding(String),

    /// The endpoint is not a valid URL.
    #[error("Invalid endpoint URL {url}: {source}")]
    InvalidEndpoint {
        /// The rejected value.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },

    /// The HTTP client could not be built.
    #[error("HTTP client setup failed")]
    Client(#[source] reqwest::Error),

    /// No async runtime was available to drive the HTTP client.
    #[error("No runtime available for HTTP requests")]
    NoRuntime,

    /// The request did not produce a response.
    #[error("Request to {url} failed: {source}")]
    Request {
        /// Target URL.
        url: String,
        /// Transport failure.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with an error status.
    #[error("{url} answered HTTP {status}")]
    Status {
        /// Target URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The endpoint lists no repositories.
    #[error("No repositories exposed by {0}")]
    NoRepositories(String),

    /// The configured repository is not exposed by the endpoint.
    #[error("Repository {0} not found")]
    RepositoryNotFound(String),

    /// The response could not be understood.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The fetch permit was released mid-transfer.
    #[error(transparent)]
    Throttle(#[from] ThrottleError),

    /// The worker was asked to stop.
    #[error("Interrupted")]
    Interrupted,
}

/// Maps [`CmisError`] onto error kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmisTaxonomy;

impl ErrorTaxonomy for CmisTaxonomy {
    fn kind_of(&self, error: &(dyn StdError + 'static)) -> Option<ErrorKind> {
        if let Some(err) = error.downcast_ref::<reqwest::Error>() {
            return reqwest_kind(err);
        }
        match error.downcast_ref::<CmisError>()? {
            CmisError::UnknownBinding(_)
            | CmisError::InvalidEndpoint { .. }
            | CmisError::Client(_)
            | CmisError::NoRuntime
            | CmisError::NoRepositories(_)
            | CmisError::RepositoryNotFound(_) => Some(ErrorKind::Configuration),
            CmisError::Request { source, .. } => reqwest_kind(source),
            CmisError::Status { status, .. } => status_kind(*status),
            CmisError::Interrupted => Some(ErrorKind::Interrupted),
            CmisError::Malformed(_) | CmisError::Throttle(_) => None,
        }
    }
}

fn reqwest_kind(err: &reqwest::Error) -> Option<ErrorKind> {
    if err.is_builder() {
        Some(ErrorKind::Configuration)
    } else if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        Some(ErrorKind::Network)
    } else if let Some(status) = err.status() {
        status_kind(status.as_u16())
    } else {
        None
    }
}

fn status_kind(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::Authentication),
        404 => Some(ErrorKind::Configuration),
        503 => Some(ErrorKind::NotBound),
        500..=599 => Some(ErrorKind::RemoteTransport),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: &CmisError) -> Option<ErrorKind> {
        CmisTaxonomy.kind_of(err)
    }

    #[test]
    fn test_status_mapping() {
        let status = |status| CmisError::Status {
            url: "http://repo".to_string(),
            status,
        };
        assert_eq!(kind(&status(401)), Some(ErrorKind::Authentication));
        assert_eq!(kind(&status(403)), Some(ErrorKind::Authentication));
        assert_eq!(kind(&status(503)), Some(ErrorKind::NotBound));
        assert_eq!(kind(&status(502)), Some(ErrorKind::RemoteTransport));
        assert_eq!(kind(&status(404)), Some(ErrorKind::Configuration));
        assert_eq!(kind(&status(409)), None);
    }

    #[test]
    fn test_parameter_errors_are_configuration() {
        assert_eq!(
            kind(&CmisError::UnknownBinding("soap".to_string())),
            Some(ErrorKind::Configuration)
        );
        assert_eq!(
            kind(&CmisError::RepositoryNotFound("A1".to_string())),
            Some(ErrorKind::Configuration)
        );
    }

    #[test]
    fn test_interrupt() {
        assert_eq!(kind(&CmisError::Interrupted), Some(ErrorKind::Interrupted));
    }
}
