//! MongoDB probe errors.

use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;

use tether_core::{ErrorKind, ErrorTaxonomy};
use tether_fetch::ThrottleError;
use thiserror::Error;

/// MongoDB probe errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The port parameter is not a TCP port number.
    #[error("Invalid port {0}; expected a number between 1 and 65535")]
    InvalidPort(String),

    /// The host could not be resolved.
    #[error("Cannot resolve host {host}: {source}")]
    Resolve {
        /// Configured host.
        host: String,
        /// Resolver failure.
        #[source]
        source: io::Error,
    },

    /// The host resolved to no addresses.
    #[error("Host {0} has no addresses")]
    NoAddress(String),

    /// No address accepted the connection.
    #[error("Cannot connect to {addr}: {source}")]
    Connect {
        /// Last address tried.
        addr: SocketAddr,
        /// Socket failure.
        #[source]
        source: io::Error,
    },

    /// A read or write on an open connection failed.
    #[error("Socket {op} failed: {source}")]
    Socket {
        /// What was being done.
        op: &'static str,
        /// Socket failure.
        #[source]
        source: io::Error,
    },

    /// The server did not answer in time.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The server closed the connection.
    #[error("Connection closed by server")]
    Closed,

    /// The server answered something other than a command reply.
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// The server answered the command with `ok: 0`.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The server rejected the credentials, or failed to prove it knows them.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// An earlier call gave up between request and reply, so the connection
    /// may still carry its reply.
    #[error("Connection abandoned mid-exchange")]
    Abandoned,

    /// The fetch permit was released mid-transfer.
    #[error(transparent)]
    Throttle(#[from] ThrottleError),

    /// The worker was asked to stop.
    #[error("Interrupted")]
    Interrupted,
}

impl ProbeError {
    /// Recovers a probe error carried through an `io::Error`.
    pub(crate) fn from_io(op: &'static str, err: io::Error) -> Self {
        if let Some(inner) = err.get_ref() {
            if let Some(probe) = inner.downcast_ref::<ProbeError>() {
                match probe {
                    ProbeError::Interrupted => return ProbeError::Interrupted,
                    ProbeError::Timeout(what) => return ProbeError::Timeout(*what),
                    _ => {}
                }
            }
            if inner.downcast_ref::<ThrottleError>().is_some() {
                return ProbeError::Throttle(ThrottleError::Invalidated);
            }
        }
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ProbeError::Closed,
            _ => ProbeError::Socket { op, source: err },
        }
    }
}

/// Maps [`ProbeError`] onto error kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeTaxonomy;

impl ErrorTaxonomy for ProbeTaxonomy {
    fn kind_of(&self, error: &(dyn StdError + 'static)) -> Option<ErrorKind> {
        match error.downcast_ref::<ProbeError>()? {
            ProbeError::InvalidPort(_) | ProbeError::Resolve { .. } | ProbeError::NoAddress(_) => {
                Some(ErrorKind::Configuration)
            }
            ProbeError::Connect { .. }
            | ProbeError::Socket { .. }
            | ProbeError::Timeout(_)
            | ProbeError::Closed
            | ProbeError::Abandoned => Some(ErrorKind::Network),
            ProbeError::CommandFailed(_) => Some(ErrorKind::RemoteTransport),
            ProbeError::AuthFailed(_) => Some(ErrorKind::Authentication),
            ProbeError::Interrupted => Some(ErrorKind::Interrupted),
            ProbeError::Malformed(_) | ProbeError::Throttle(_) => None,
        }
    }
}
