//! Pool error types.

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::Lifecycle;

/// How a driver failure should be handled by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The connection is unusable; the request may succeed on another one.
    Transient,
    /// The request itself is invalid; retrying is pointless.
    Fatal,
}

/// Errors reported by a [`Connection`](crate::Connection) or
/// [`Connector`](crate::Connector).
///
/// Driver implementations map their native errors onto these variants so
/// that the pool can classify them without knowing the driver.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The server closed the connection (EOF).
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The connection was reset by the peer.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The connection was aborted locally.
    #[error("connection aborted: {0}")]
    ConnectionAborted(String),

    /// The server refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Writing to the socket failed.
    #[error("broken pipe")]
    BrokenPipe,

    /// The operation did not complete in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A row with the same key already exists.
    #[error("duplicate entry: {0}")]
    Duplicate(String),

    /// The server rejected the statement.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code.
        code: u32,
        /// Server error message.
        message: String,
    },

    /// Any other driver failure.
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Classify this error.
    ///
    /// Connection-level failures (closed, reset, aborted, refused, broken
    /// pipe, timeout) are transient. I/O errors are transient when their
    /// kind describes a lost or unreachable peer. Everything else concerns
    /// the request itself and is fatal.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionClosed
            | Self::ConnectionReset(_)
            | Self::ConnectionAborted(_)
            | Self::ConnectionRefused(_)
            | Self::BrokenPipe
            | Self::Timeout(_) => ErrorKind::Transient,
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted => ErrorKind::Transient,
                _ => ErrorKind::Fatal,
            },
            Self::Authentication(_) | Self::Duplicate(_) | Self::Server { .. } | Self::Other(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Check if this error reports a duplicate key.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Pool is draining or closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Pool has not been initialized yet.
    #[error("pool is not initialized")]
    NotInitialized,

    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Opening a new connection failed.
    #[error("failed to create connection: {0}")]
    Connect(#[source] DriverError),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// Leased connections were not returned before the close timeout.
    #[error("close timed out with {outstanding} connection(s) still leased")]
    CloseTimeout {
        /// Number of connections still outstanding.
        outstanding: usize,
    },
}

/// Errors that can occur while initializing the pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InitError {
    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// The pool is not in a state that allows initialization.
    #[error("cannot initialize pool in state {0:?}")]
    InvalidState(Lifecycle),

    /// Not a single connection could be established.
    #[error("no database connection could be established: {source}")]
    NoConnections {
        /// The last connection error.
        #[source]
        source: DriverError,
    },

    /// Fewer than `min_connections` could be established under the strict
    /// policy.
    #[error("only {established} of {required} required connections could be established")]
    Partial {
        /// Connections that were opened.
        established: usize,
        /// Connections required by `min_connections`.
        required: usize,
    },
}

/// Errors returned by [`Pool::exec`](crate::Pool::exec).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecError {
    /// A connection could not be acquired.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The statement failed for a reason retrying cannot fix.
    #[error("query failed: {0}")]
    Fatal(#[source] DriverError),

    /// Every attempt failed with a transient error.
    #[error("query failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last transient error.
        #[source]
        source: DriverError,
    },
}

impl ExecError {
    /// Check if this error reports a duplicate key.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Fatal(e) if e.is_duplicate())
    }

    /// Check if the pool was closed.
    #[must_use]
    pub fn is_pool_closed(&self) -> bool {
        matches!(self, Self::Pool(PoolError::PoolClosed))
    }

    /// The underlying driver error, if any.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Pool(PoolError::Connect(e)) => Some(e),
            Self::Fatal(e) | Self::RetriesExhausted { source: e, .. } => Some(e),
            Self::Pool(_) => None,
        }
    }
}
