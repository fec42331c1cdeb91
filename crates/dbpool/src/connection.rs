//! Driver-facing traits.
//!
//! The pool is driver-agnostic. A database driver plugs in by implementing
//! [`Connector`], which opens sessions, and [`Connection`], which runs
//! statements on one session. Both use `#[async_trait]` so the futures they
//! return are `Send` and can be driven from background tasks spawned by the
//! pool.

use async_trait::async_trait;

use crate::error::DriverError;
use crate::value::{Rows, Value};

/// A single network session to the database server.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Execute a statement with positional parameters.
    async fn execute(&mut self, query: &str, params: &[Value]) -> Result<Rows, DriverError>;

    /// Check that the session is still alive.
    async fn ping(&mut self) -> Result<(), DriverError>;

    /// Close the session gracefully.
    ///
    /// The pool calls this exactly once before dropping the connection,
    /// except when the connection is detached from the pool.
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Factory for new connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, DriverError>;
}
