//! Error types for pgconnector

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for pgconnector operations
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read, parsed or validated
    #[error("failed to load config from {}: {reason}", .path.display())]
    ConfigLoad {
        /// Source the configuration was read from
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Invalid connection parameter
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Opening a connection failed
    #[error("failed to connect to {target}: {source}")]
    Connect {
        /// Host (or socket path) the connection was aimed at
        target: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Liveness check on a fresh connection failed
    #[error("ping failed: {0}")]
    Ping(#[source] Box<Error>),

    /// Reconnect loop exhausted its time budget
    #[error("failed to reconnect within {timeout:?} ({attempts} attempts)")]
    ReconnectTimeout {
        /// The configured budget
        timeout: Duration,
        /// Number of connect attempts made
        attempts: u32,
        /// Reason the final attempt failed
        last_error: Option<String>,
    },

    /// Reconnect loop stopped by its cancellation token
    #[error("reconnect cancelled after {attempts} attempts")]
    Cancelled {
        /// Number of connect attempts made before cancellation
        attempts: u32,
    },

    /// Establishing the transport took longer than the configured connect timeout
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS negotiation or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Error reported by the server
    #[error("server error: {0}")]
    Server(String),

    /// Connection closed unexpectedly
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation not valid in the current connection state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a low-level failure as a connect error aimed at `target`
    pub fn connect(target: impl Into<String>, source: Error) -> Self {
        Error::Connect {
            target: target.into(),
            source: Box::new(source),
        }
    }

    /// Short label used for metrics and log fields
    pub fn category(&self) -> &'static str {
        match self {
            Error::ConfigLoad { .. } | Error::Config(_) => "config",
            Error::Connect { source, .. } => source.category(),
            Error::Ping(_) => "ping",
            Error::ReconnectTimeout { .. } => "reconnect_timeout",
            Error::Cancelled { .. } => "cancelled",
            Error::ConnectTimeout(_) => "connect_timeout",
            Error::Io(_) => "io",
            Error::Tls(_) => "tls",
            Error::Protocol(_) => "protocol",
            Error::Authentication(_) => "authentication",
            Error::Server(_) => "server",
            Error::ConnectionClosed => "connection_closed",
            Error::InvalidState { .. } => "invalid_state",
        }
    }

    /// Whether a later attempt against the same configuration could succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Connect { source, .. } | Error::Ping(source) => source.is_retriable(),
            Error::Io(_)
            | Error::ConnectTimeout(_)
            | Error::ConnectionClosed
            | Error::Server(_)
            | Error::Tls(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_duration() {
        let err = Error::ReconnectTimeout {
            timeout: Duration::from_secs(30),
            attempts: 15,
            last_error: None,
        };
        assert_eq!(
            err.to_string(),
            "failed to reconnect within 30s (15 attempts)"
        );
    }

    #[test]
    fn test_connect_error_keeps_source() {
        let err = Error::connect("db.internal:5432", Error::ConnectionClosed);
        assert_eq!(
            err.to_string(),
            "failed to connect to db.internal:5432: connection closed"
        );
        assert_eq!(err.category(), "connection_closed");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_retriable() {
        let io = Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(io.is_retriable());
        assert!(Error::Ping(Box::new(Error::ConnectionClosed)).is_retriable());
        assert!(!Error::Authentication("bad password".into()).is_retriable());
        assert!(!Error::Config("invalid port".into()).is_retriable());
    }
}
