// src/core/errors.rs

//! Defines the primary error type shared by every SpinelQ connection component.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering connection, protocol, and initialization failures.
///
/// Errors travel over broadcast channels and through the shared initialization future,
/// so the type must be cheap to clone. I/O errors are wrapped in an `Arc` for that reason.
#[derive(Error, Debug)]
pub enum SpinelQError {
    #[error("IO Error: {0}")]
    Io(Arc<io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Connection is not ready (status: {0})")]
    NotConnected(String),

    #[error("Connection is already connecting or connected")]
    AlreadyConnecting,

    #[error("Connection closed")]
    ConnectionClosed,

    /// An error reply sent back by the server, e.g. `WRONGPASS` or `NOSCRIPT`.
    #[error("{0}")]
    Server(String),

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    #[error("TLS Error: {0}")]
    Tls(String),

    /// The server reports a version older than the queue supports.
    #[error(
        "SpinelQ requires a Redis-compatible server of version {required} or newer, but the server reports version {actual}"
    )]
    VersionMismatch { required: String, actual: String },

    #[error("Server did not report a redis_version in its INFO output")]
    MissingVersion,

    #[error("Invalid version string '{0}'")]
    InvalidVersion(String),

    #[error("Script Error: {0}")]
    Script(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl SpinelQError {
    /// Returns true when the server refused the TCP connection.
    ///
    /// This is the transient condition seen while a server is still starting up,
    /// and the readiness wait keeps going when it sees one.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, SpinelQError::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused)
    }

    /// Returns true for failures of the transport itself, after which the
    /// connection can no longer be trusted to be in sync.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            SpinelQError::Io(_)
                | SpinelQError::Timeout(_)
                | SpinelQError::ConnectionClosed
                | SpinelQError::Protocol(_)
                | SpinelQError::Tls(_)
        )
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for SpinelQError {
    fn clone(&self) -> Self {
        match self {
            SpinelQError::Io(e) => SpinelQError::Io(Arc::clone(e)),
            SpinelQError::IncompleteData => SpinelQError::IncompleteData,
            SpinelQError::Protocol(s) => SpinelQError::Protocol(s.clone()),
            SpinelQError::Timeout(s) => SpinelQError::Timeout(s.clone()),
            SpinelQError::NotConnected(s) => SpinelQError::NotConnected(s.clone()),
            SpinelQError::AlreadyConnecting => SpinelQError::AlreadyConnecting,
            SpinelQError::ConnectionClosed => SpinelQError::ConnectionClosed,
            SpinelQError::Server(s) => SpinelQError::Server(s.clone()),
            SpinelQError::UnexpectedReply { command, reply } => SpinelQError::UnexpectedReply {
                command: command.clone(),
                reply: reply.clone(),
            },
            SpinelQError::Tls(s) => SpinelQError::Tls(s.clone()),
            SpinelQError::VersionMismatch { required, actual } => SpinelQError::VersionMismatch {
                required: required.clone(),
                actual: actual.clone(),
            },
            SpinelQError::MissingVersion => SpinelQError::MissingVersion,
            SpinelQError::InvalidVersion(s) => SpinelQError::InvalidVersion(s.clone()),
            SpinelQError::Script(s) => SpinelQError::Script(s.clone()),
            SpinelQError::Internal(s) => SpinelQError::Internal(s.clone()),
        }
    }
}

impl PartialEq for SpinelQError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SpinelQError::Io(e1), SpinelQError::Io(e2)) => {
                e1.kind() == e2.kind() && e1.to_string() == e2.to_string()
            }
            (SpinelQError::Protocol(s1), SpinelQError::Protocol(s2)) => s1 == s2,
            (SpinelQError::Timeout(s1), SpinelQError::Timeout(s2)) => s1 == s2,
            (SpinelQError::NotConnected(s1), SpinelQError::NotConnected(s2)) => s1 == s2,
            (SpinelQError::Server(s1), SpinelQError::Server(s2)) => s1 == s2,
            (
                SpinelQError::UnexpectedReply {
                    command: c1,
                    reply: r1,
                },
                SpinelQError::UnexpectedReply {
                    command: c2,
                    reply: r2,
                },
            ) => c1 == c2 && r1 == r2,
            (SpinelQError::Tls(s1), SpinelQError::Tls(s2)) => s1 == s2,
            (
                SpinelQError::VersionMismatch {
                    required: q1,
                    actual: a1,
                },
                SpinelQError::VersionMismatch {
                    required: q2,
                    actual: a2,
                },
            ) => q1 == q2 && a1 == a2,
            (SpinelQError::InvalidVersion(s1), SpinelQError::InvalidVersion(s2)) => s1 == s2,
            (SpinelQError::Script(s1), SpinelQError::Script(s2)) => s1 == s2,
            (SpinelQError::Internal(s1), SpinelQError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<io::Error> for SpinelQError {
    fn from(e: io::Error) -> Self {
        SpinelQError::Io(Arc::new(e))
    }
}

impl From<tokio::time::error::Elapsed> for SpinelQError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        SpinelQError::Timeout(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for SpinelQError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        SpinelQError::Protocol(format!("reply is not valid UTF-8: {e}"))
    }
}
