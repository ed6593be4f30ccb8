use crate::status::ProxyStatus;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Which half of a tunnel an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client request body to destination socket.
    Upstream,
    /// Destination socket to client response body.
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => write!(f, "client->target"),
            Direction::Downstream => write!(f, "target->client"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Failed to resolve host '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("Failed to connect to '{addr}': {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Error in {direction} tunnel: {source}")]
    Relay {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP/3 error: {0}")]
    Http3(String),
}

impl ProxyError {
    /// The status a request declined with this error is answered with.
    ///
    /// Only a failed shared-secret check blocks the client; every other
    /// failure tells it to go direct.
    pub fn status(&self) -> ProxyStatus {
        match self {
            ProxyError::Auth(_) => ProxyStatus::Blocked,
            ProxyError::UnsupportedRequest(_)
            | ProxyError::Resolve { .. }
            | ProxyError::Dial { .. }
            | ProxyError::Relay { .. }
            | ProxyError::Cancelled
            | ProxyError::Io(_)
            | ProxyError::Config(_)
            | ProxyError::Tls(_)
            | ProxyError::Http3(_) => ProxyStatus::GoDirect,
        }
    }

    pub(crate) fn relay(direction: Direction, source: std::io::Error) -> Self {
        ProxyError::Relay { direction, source }
    }
}
